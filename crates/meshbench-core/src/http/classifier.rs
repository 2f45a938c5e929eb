/// Decides whether a response status counts as a successful probe.
pub trait SuccessClassifier: Send + Sync {
    fn is_success(&self, status: u16) -> bool;
}

/// Success means exactly one status code, 200 unless configured otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodeClassifier {
    code: u16,
}

impl StatusCodeClassifier {
    pub fn new(code: u16) -> Self {
        Self { code }
    }

    pub fn code(&self) -> u16 {
        self.code
    }
}

impl Default for StatusCodeClassifier {
    fn default() -> Self {
        Self::new(200)
    }
}

impl SuccessClassifier for StatusCodeClassifier {
    fn is_success(&self, status: u16) -> bool {
        status == self.code
    }
}

impl<F> SuccessClassifier for F
where
    F: Fn(u16) -> bool + Send + Sync,
{
    fn is_success(&self, status: u16) -> bool {
        self(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_accepts_only_200() {
        let classifier = StatusCodeClassifier::default();
        assert!(classifier.is_success(200));
        assert!(!classifier.is_success(201));
        assert!(!classifier.is_success(500));
    }

    #[test]
    fn custom_code() {
        let classifier = StatusCodeClassifier::new(204);
        assert_eq!(classifier.code(), 204);
        assert!(classifier.is_success(204));
        assert!(!classifier.is_success(200));
    }

    #[test]
    fn closures_classify() {
        let any_2xx = |status: u16| (200..300).contains(&status);
        assert!(any_2xx.is_success(201));
        assert!(!any_2xx.is_success(302));
    }
}

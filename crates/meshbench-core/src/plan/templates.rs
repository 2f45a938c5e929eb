use crate::plan::model::{
    BenchConfig, HttpMethod, LoadSpec, PayloadParam, RequestStep, VariantConfig,
};

/// Catalogue of the Online Boutique demo shop.
pub const BOUTIQUE_PRODUCTS: [&str; 9] = [
    "0PUK6V6EV0",
    "1YMWWN1N4O",
    "2ZYFJ3GM2N",
    "66VCHSJNUP",
    "6E92ZMYYFZ",
    "9SIQT8TOJO",
    "L9ECAV7KIM",
    "LS4PSXUNUM",
    "OLJCESPC7Z",
];

const CURRENCIES: [&str; 4] = ["EUR", "USD", "JPY", "CAD"];
const QUANTITIES: [&str; 6] = ["1", "2", "3", "4", "5", "10"];

/// Shopper interaction measured against Online Boutique.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BoutiqueRequest {
    /// `GET /`
    Index,
    /// `POST /setCurrency` with a random currency.
    #[default]
    SetCurrency,
    /// `GET /product/<random product>`
    BrowseProduct,
    /// `GET /cart`
    ViewCart,
    /// Product page, then `POST /cart` with a random quantity.
    AddToCart,
    /// Add to cart, then `POST /cart/checkout` with a fixed test customer.
    Checkout,
}

impl BoutiqueRequest {
    fn title(self) -> &'static str {
        match self {
            BoutiqueRequest::Index => "home page",
            BoutiqueRequest::SetCurrency => "currency switch",
            BoutiqueRequest::BrowseProduct => "product page",
            BoutiqueRequest::ViewCart => "cart view",
            BoutiqueRequest::AddToCart => "add to cart",
            BoutiqueRequest::Checkout => "checkout",
        }
    }
}

// ---------------------------------------------------------------------------
// Template constructors
// ---------------------------------------------------------------------------

/// Bookinfo product page behind the ingress gateway, compared with and
/// without a filter installed in the sidecars.
///
/// `gateway` is a base URL such as `http://localhost:8080`; a bare
/// `host:port` is taken as plain HTTP.
pub fn bookinfo(gateway: &str) -> BenchConfig {
    let mut spec = LoadSpec::new(gateway_url(gateway, "/productpage"));
    spec.concurrency = 10;
    spec.rate_qps = 50;
    spec.duration_seconds = 60;
    spec.per_request_timeout_ms = 5_000;

    let mut config = BenchConfig::new("Bookinfo product page", spec);
    config.variants = filter_variants();
    config
}

/// Online Boutique under one kind of shopper request. Random choices are
/// drawn afresh for every probe.
pub fn online_boutique(gateway: &str, request: BoutiqueRequest) -> BenchConfig {
    let mut spec = match request {
        BoutiqueRequest::Index => LoadSpec::new(gateway_url(gateway, "/")),
        BoutiqueRequest::SetCurrency => {
            let mut spec = LoadSpec::new(gateway_url(gateway, "/setCurrency"));
            spec.method = HttpMethod::Post;
            spec.payload = vec![PayloadParam::one_of("currency_code", CURRENCIES)];
            spec
        }
        BoutiqueRequest::BrowseProduct => product_page(gateway),
        BoutiqueRequest::ViewCart => LoadSpec::new(gateway_url(gateway, "/cart")),
        BoutiqueRequest::AddToCart => {
            let mut spec = product_page(gateway);
            spec.steps = vec![add_to_cart_step()];
            spec
        }
        BoutiqueRequest::Checkout => {
            let mut spec = product_page(gateway);
            spec.steps = vec![add_to_cart_step(), checkout_step()];
            spec
        }
    };
    spec.concurrency = 20;
    spec.rate_qps = 100;
    spec.duration_seconds = 60;
    spec.per_request_timeout_ms = 5_000;

    let mut config = BenchConfig::new(format!("Online Boutique {}", request.title()), spec);
    config.variants = filter_variants();
    config
}

fn product_page(gateway: &str) -> LoadSpec {
    let mut spec = LoadSpec::new(gateway_url(gateway, "/product/{product_id}"));
    spec.vars = vec![PayloadParam::one_of("product_id", BOUTIQUE_PRODUCTS)];
    spec
}

fn add_to_cart_step() -> RequestStep {
    RequestStep::new(HttpMethod::Post, "/cart").with_payload(vec![
        PayloadParam::fixed("product_id", "{product_id}"),
        PayloadParam::one_of("quantity", QUANTITIES),
    ])
}

fn checkout_step() -> RequestStep {
    let fields = [
        ("email", "someone@example.com"),
        ("street_address", "1600 Amphitheatre Parkway"),
        ("zip_code", "94043"),
        ("city", "Mountain View"),
        ("state", "CA"),
        ("country", "United States"),
        ("credit_card_number", "4432-8015-6152-0454"),
        ("credit_card_expiration_month", "1"),
        ("credit_card_expiration_year", "2039"),
        ("credit_card_cvv", "672"),
    ];
    RequestStep::new(HttpMethod::Post, "/cart/checkout").with_payload(
        fields
            .into_iter()
            .map(|(name, value)| PayloadParam::fixed(name, value))
            .collect(),
    )
}

/// Join `path` onto the gateway base URL.
fn gateway_url(gateway: &str, path: &str) -> String {
    let base = gateway.trim().trim_end_matches('/');
    if base.contains("://") {
        format!("{base}{path}")
    } else {
        format!("http://{base}{path}")
    }
}

/// Baseline without any filter followed by a filter that is built and
/// refreshed through an external script.
fn filter_variants() -> Vec<VariantConfig> {
    let mut filtered = VariantConfig::new("snicket_filter");
    filtered.deploy = Some(vec![
        "./deploy_filter.sh".to_string(),
        "{variant}".to_string(),
    ]);
    filtered.undeploy = Some(vec!["./remove_filter.sh".to_string()]);
    vec![VariantConfig::new("no_filter"), filtered]
}

/*!
 * A rust library for interacting with the Endicia Label Server API.
 *
 * The label server speaks two XML surfaces: a POST-based label service
 * (labels, pass-phrase changes, postage purchases) and a GET-based ELS
 * service (tracking status, refunds, carrier pickups). Carrier-reported
 * failures ("tracking number not found", "pickup location invalid") come
 * back as ordinary results with `success == false`; only validation,
 * transport, and unparseable-response problems are `Err`.
 *
 * Example:
 *
 * ```no_run
 * use endicia::{Endicia, RequestOptions};
 *
 * async fn print_label() {
 *     // Initialize the Endicia client.
 *     let endicia = Endicia::new_from_env();
 *
 *     let mut options = RequestOptions::new();
 *     options.insert("MailClass".to_string(), "First".to_string());
 *     options.insert("WeightOz".to_string(), "10".to_string());
 *     options.insert("ToPostalCode".to_string(), "48197".to_string());
 *
 *     // Request a label.
 *     let label = endicia.get_label(&options).await.unwrap();
 *
 *     println!("{} {}", label.status, label.tracking_number);
 * }
 * ```
 */
use std::{collections::BTreeMap, error, fmt, io, sync::Arc};

use log::debug;
use reqwest::{Client, StatusCode, Url};
use url::ParseError;

mod config;
mod request;
mod response;
mod types;

pub use crate::config::Config;
pub use crate::types::*;

/// Flat option map for a single request. Keys use the carrier's field
/// names; unknown keys pass through to the request XML untouched.
pub type RequestOptions = BTreeMap<String, String>;

/// Production host for the POST-based label service.
const PRODUCTION_HOST: &str = "https://labelserver.endicia.com";

/// Sandbox host, selected for either surface when the effective `Test`
/// flag upper-cases to "YES".
const TEST_HOST: &str = "https://www.envmgr.com";

/// Production host for the GET-based ELS service (status, refund, pickup).
const ELS_PRODUCTION_HOST: &str = "https://www.endicia.com";

const LABEL_SERVICE_PATH: &str = "/LabelService/EwsLabelService.asmx";
const ELS_SERVICE_PATH: &str = "/ELS/ELSServices.cfc";

/// Entrypoint for interacting with the Endicia Label Server API.
///
/// The client is immutable after construction and safe to share between
/// tasks; every operation is a single synchronous round trip.
pub struct Endicia {
    config: Config,

    client: Arc<Client>,

    label_base: Option<Url>,
    els_base: Option<Url>,
}

impl Endicia {
    /// Create a new Endicia client struct with the given account defaults.
    /// Per-call options always override the defaults at request time.
    pub fn new(config: Config) -> Self {
        let client = Client::builder().build();
        match client {
            Ok(c) => Self {
                config,

                client: Arc::new(c),

                label_base: None,
                els_base: None,
            },
            Err(e) => panic!("creating client failed: {:?}", e),
        }
    }

    /// Create a new Endicia client struct with defaults from the
    /// `ENDICIA_ACCOUNT_ID`, `ENDICIA_REQUESTER_ID`, `ENDICIA_PASS_PHRASE`
    /// and `ENDICIA_TEST` environment variables.
    pub fn new_from_env() -> Self {
        Endicia::new(Config::from_env())
    }

    /// Point the label service at a different base URL. Overrides the
    /// test/production host selection; mostly useful against a mock server.
    pub fn label_base_url(mut self, url: Url) -> Self {
        self.label_base = Some(url);
        self
    }

    /// Point the ELS service at a different base URL.
    pub fn els_base_url(mut self, url: Url) -> Self {
        self.els_base = Some(url);
        self
    }

    /// Request a shipping label.
    /// FROM: the label service's `GetPostageLabelXML` method.
    pub async fn get_label(&self, options: &RequestOptions) -> Result<Label, EndiciaError> {
        let merged = self.config.merge(options);
        let xml = request::label_request_xml(&merged)?;
        let url = self.label_service_url(&merged, "GetPostageLabelXML")?;

        let body = self.post_form(url, "labelRequestXML", &xml).await?;

        response::parse_label(&body, &xml)
    }

    /// Rotate the account pass phrase.
    /// FROM: the label service's `ChangePassPhraseXML` method.
    pub async fn change_pass_phrase(
        &self,
        new_phrase: &str,
        options: &RequestOptions,
    ) -> Result<OperationResult, EndiciaError> {
        let merged = self.config.merge(options);
        let xml = request::change_pass_phrase_request_xml(new_phrase, &merged)?;
        let url = self.label_service_url(&merged, "ChangePassPhraseXML")?;

        let body = self.post_form(url, "changePassPhraseRequestXML", &xml).await?;

        response::parse_operation(&body, "ChangePassPhraseRequestResponse")
    }

    /// Add postage to the account balance.
    /// FROM: the label service's `BuyPostageXML` method.
    pub async fn buy_postage<A>(
        &self,
        amount: A,
        options: &RequestOptions,
    ) -> Result<OperationResult, EndiciaError>
    where
        A: ToString,
    {
        let merged = self.config.merge(options);
        let xml = request::buy_postage_request_xml(&amount.to_string(), &merged)?;
        let url = self.label_service_url(&merged, "BuyPostageXML")?;

        let body = self.post_form(url, "buyPostageRequestXML", &xml).await?;

        response::parse_operation(&body, "BuyPostageRequestResponse")
    }

    /// Look up the tracking status for a PIC. A carrier status code of
    /// "-1" ("tracking number not found") is reported via
    /// `success == false`, not an error.
    /// FROM: the ELS service's `StatusRequest` method.
    pub async fn status_request(
        &self,
        tracking_number: &str,
        options: &RequestOptions,
    ) -> Result<TrackingStatus, EndiciaError> {
        let merged = self.config.merge(options);
        let xml = request::status_request_xml(tracking_number, &merged)?;

        let body = self.get_els("StatusRequest", &xml, &merged).await?;

        response::parse_status(&body)
    }

    /// Request a postage refund for a PIC.
    /// FROM: the ELS service's `RefundRequest` method.
    pub async fn refund_request(
        &self,
        tracking_number: &str,
        options: &RequestOptions,
    ) -> Result<RefundStatus, EndiciaError> {
        let merged = self.config.merge(options);
        let xml = request::refund_request_xml(tracking_number, &merged)?;

        let body = self.get_els("RefundRequest", &xml, &merged).await?;

        response::parse_refund(&body)
    }

    /// Schedule a carrier pickup for a PIC. Additional address-override
    /// fields in `options` (name, street, city, phone, ...) pass through
    /// to the request as-is.
    /// FROM: the ELS service's `CarrierPickupRequest` method.
    pub async fn carrier_pickup_request(
        &self,
        tracking_number: &str,
        package_location: &str,
        options: &RequestOptions,
    ) -> Result<PickupConfirmation, EndiciaError> {
        let merged = self.config.merge(options);
        let xml = request::carrier_pickup_request_xml(
            tracking_number,
            package_location,
            &merged,
            options,
        )?;

        let body = self.get_els("CarrierPickupRequest", &xml, &merged).await?;

        response::parse_pickup(&body)
    }

    /// Resolve the label-service URL for a POST method, honoring the
    /// effective `Test` flag (option, else default, else "NO").
    fn label_service_url(
        &self,
        options: &RequestOptions,
        method: &str,
    ) -> Result<Url, EndiciaError> {
        let host = match &self.label_base {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => {
                if test_mode(options) {
                    TEST_HOST.to_string()
                } else {
                    PRODUCTION_HOST.to_string()
                }
            }
        };

        Url::parse(&format!("{}{}/{}", host, LABEL_SERVICE_PATH, method))
            .map_err(EndiciaError::InvalidUri)
    }

    /// Resolve the ELS endpoint, honoring the effective `Test` flag the
    /// same way the label service does.
    fn els_service_url(&self, options: &RequestOptions) -> Result<Url, EndiciaError> {
        let host = match &self.els_base {
            Some(url) => url.as_str().trim_end_matches('/').to_string(),
            None => {
                if test_mode(options) {
                    TEST_HOST.to_string()
                } else {
                    ELS_PRODUCTION_HOST.to_string()
                }
            }
        };

        Url::parse(&format!("{}{}", host, ELS_SERVICE_PATH)).map_err(EndiciaError::InvalidUri)
    }

    /// POST a request document as the given form field and hand back the
    /// normalized response body.
    async fn post_form(&self, url: Url, field: &str, xml: &str) -> Result<String, EndiciaError> {
        debug!("POST {}", url.path());

        let resp = self.client.post(url).form(&[(field, xml)]).send().await?;
        match resp.status() {
            StatusCode::OK => (),
            s => {
                return Err(EndiciaError::ApiError(ApiError {
                    status_code: s,
                    body: resp.text().await?,
                }))
            }
        };

        Ok(response::normalize_body(&resp.text().await?))
    }

    /// GET an ELS method, with the whole request document URL-escaped into
    /// the `XMLInput` query parameter.
    async fn get_els(
        &self,
        method: &str,
        xml: &str,
        options: &RequestOptions,
    ) -> Result<String, EndiciaError> {
        let url = self.els_service_url(options)?;
        debug!("GET {} method={}", url.path(), method);

        let resp = self
            .client
            .get(url)
            .query(&[("method", method), ("XMLInput", xml)])
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => (),
            s => {
                return Err(EndiciaError::ApiError(ApiError {
                    status_code: s,
                    body: resp.text().await?,
                }))
            }
        };

        Ok(response::normalize_body(&resp.text().await?))
    }
}

/// Effective test flag over a merged option map.
fn test_mode(options: &RequestOptions) -> bool {
    options
        .get("Test")
        .map(|v| v.to_uppercase() == "YES")
        .unwrap_or(false)
}

/// A non-2xx answer from the carrier.
#[derive(Debug)]
pub struct ApiError {
    pub status_code: StatusCode,
    pub body: String,
}

/// Error type returned by our library.
#[derive(Debug)]
pub enum EndiciaError {
    /// The carrier answered with a non-2xx status.
    ApiError(ApiError),
    /// The HTTP round trip itself failed.
    InternalError(reqwest::Error),
    InvalidUri(ParseError),
    /// Writing a request document failed.
    XmlWrite(io::Error),
    /// A response document could not be read.
    XmlRead(quick_xml::Error),
    /// The response decoded but did not carry the expected elements.
    UnexpectedResponse(String),
    /// Insured jewelry shipments are disallowed to this destination ZIP;
    /// raised before any network call.
    InsuranceNotAllowed(String),
    /// The defaults file exists but could not be parsed.
    Config(String),
}

impl From<reqwest::Error> for EndiciaError {
    fn from(error: reqwest::Error) -> Self {
        EndiciaError::InternalError(error)
    }
}

impl From<io::Error> for EndiciaError {
    fn from(error: io::Error) -> Self {
        EndiciaError::XmlWrite(error)
    }
}

impl From<quick_xml::Error> for EndiciaError {
    fn from(error: quick_xml::Error) -> Self {
        EndiciaError::XmlRead(error)
    }
}

impl fmt::Display for EndiciaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Endicia client error: {:?}", self)
    }
}

// This is important for other errors to wrap this one.
impl error::Error for EndiciaError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            EndiciaError::InternalError(e) => Some(e),
            EndiciaError::XmlWrite(e) => Some(e),
            EndiciaError::XmlRead(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_mode, Config, Endicia, RequestOptions};

    fn options(pairs: &[(&str, &str)]) -> RequestOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_service_url_selects_sandbox() {
        let endicia = Endicia::new(Config::new());

        let url = endicia
            .label_service_url(&options(&[("Test", "YES")]), "GetPostageLabelXML")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.envmgr.com/LabelService/EwsLabelService.asmx/GetPostageLabelXML"
        );
    }

    #[test]
    fn test_label_service_url_selects_production() {
        let endicia = Endicia::new(Config::new());

        for opts in [options(&[("Test", "NO")]), options(&[])] {
            let url = endicia
                .label_service_url(&opts, "BuyPostageXML")
                .unwrap();
            assert_eq!(
                url.as_str(),
                "https://labelserver.endicia.com/LabelService/EwsLabelService.asmx/BuyPostageXML"
            );
        }
    }

    #[test]
    fn test_els_service_url_honors_test_flag() {
        let endicia = Endicia::new(Config::new());

        let url = endicia
            .els_service_url(&options(&[("Test", "YES")]))
            .unwrap();
        assert_eq!(url.as_str(), "https://www.envmgr.com/ELS/ELSServices.cfc");

        let url = endicia.els_service_url(&options(&[])).unwrap();
        assert_eq!(url.as_str(), "https://www.endicia.com/ELS/ELSServices.cfc");
    }

    #[test]
    fn test_default_test_flag_comes_from_config() {
        let mut config = Config::new();
        config.set("Test", "YES");
        let endicia = Endicia::new(config);

        // The merge happens before URL resolution in every call.
        let merged = endicia.config.merge(&options(&[]));
        assert!(test_mode(&merged));

        let merged = endicia.config.merge(&options(&[("Test", "NO")]));
        assert!(!test_mode(&merged));
    }

    #[test]
    fn test_mode_requires_yes() {
        assert!(test_mode(&options(&[("Test", "yes")])));
        assert!(!test_mode(&options(&[("Test", "1")])));
        assert!(!test_mode(&options(&[])));
    }
}

//! XML request bodies for the six carrier operations.
//!
//! The label service takes a `<LabelRequest>` document where a handful of
//! option keys ride as root attributes and everything else becomes a child
//! element; the ELS surface takes small flat documents. Builders take the
//! merged option map and return the document as a string (the carrier does
//! not want an XML declaration).

use std::io::{self, Write};

use chrono::Utc;
use quick_xml::events::BytesText;
use quick_xml::Writer;

use crate::{EndiciaError, RequestOptions};

/// Option keys emitted as attributes on the `<LabelRequest>` root, never as
/// child elements.
const LABEL_ATTRIBUTE_KEYS: [&str; 5] = [
    "LabelType",
    "Test",
    "LabelSize",
    "ImageFormat",
    "ImageResolution",
];

/// Folded into `<MailpieceDimensions>` when all three are present.
const DIMENSION_KEYS: [&str; 3] = ["Length", "Width", "Height"];

/// Destination ZIPs where insured jewelry shipments are disallowed.
const JEWELRY_EXCLUDED_ZIPS: [&str; 4] = ["10036", "10017", "94102", "94108"];

/// Build the `<LabelRequest>` document.
///
/// Fails with [`EndiciaError::InsuranceNotAllowed`] before any network
/// traffic when the options ask for Endicia insurance on a jewelry shipment
/// to an excluded destination ZIP.
pub(crate) fn label_request_xml(options: &RequestOptions) -> Result<String, EndiciaError> {
    validate_insurance(options)?;

    let nest_dimensions = DIMENSION_KEYS.iter().all(|k| options.contains_key(*k));

    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);
    let mut element = writer
        .create_element("LabelRequest")
        .with_attribute((
            "LabelType",
            options.get("LabelType").map_or("Default", String::as_str),
        ))
        .with_attribute(("Test", options.get("Test").map_or("NO", String::as_str)));
    for key in ["LabelSize", "ImageFormat", "ImageResolution"] {
        if let Some(value) = options.get(key) {
            element = element.with_attribute((key, value.as_str()));
        }
    }
    element.write_inner_content(|w| -> io::Result<()> {
        for (key, value) in options {
            if LABEL_ATTRIBUTE_KEYS.contains(&key.as_str()) {
                continue;
            }
            if nest_dimensions && DIMENSION_KEYS.contains(&key.as_str()) {
                continue;
            }
            // Jewelry is a validation flag, InsuredMail rides on <Services>.
            if key == "Jewelry" || key == "InsuredMail" {
                continue;
            }
            write_text_element(w, key, value)?;
        }
        if nest_dimensions {
            w.create_element("MailpieceDimensions").write_inner_content(|w| -> io::Result<()> {
                for key in DIMENSION_KEYS {
                    write_text_element(w, key, option_value(options, key))?;
                }
                Ok(())
            })?;
        }
        if let Some(insured) = options.get("InsuredMail") {
            w.create_element("Services")
                .with_attribute(("InsuredMail", insured.as_str()))
                .write_empty()?;
        }
        Ok(())
    })?;

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Build the `<ChangePassPhraseRequest>` document.
pub(crate) fn change_pass_phrase_request_xml(
    new_phrase: &str,
    options: &RequestOptions,
) -> Result<String, EndiciaError> {
    let mut buf = Vec::with_capacity(256);
    let mut writer = Writer::new(&mut buf);
    writer
        .create_element("ChangePassPhraseRequest")
        .write_inner_content(|w| -> io::Result<()> {
            write_certified_intermediary(w, options)?;
            write_text_element(w, "RequestID", &request_id("CPP"))?;
            write_text_element(w, "NewPassPhrase", new_phrase)?;
            Ok(())
        })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Build the `<BuyPostageRequest>` document.
pub(crate) fn buy_postage_request_xml(
    amount: &str,
    options: &RequestOptions,
) -> Result<String, EndiciaError> {
    let mut buf = Vec::with_capacity(256);
    let mut writer = Writer::new(&mut buf);
    writer
        .create_element("BuyPostageRequest")
        .write_inner_content(|w| -> io::Result<()> {
            write_certified_intermediary(w, options)?;
            write_text_element(w, "RequestID", &request_id("BP"))?;
            write_text_element(w, "RecreditAmount", amount)?;
            Ok(())
        })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Build the `<StatusRequest>` document for a single PIC.
pub(crate) fn status_request_xml(
    pic: &str,
    options: &RequestOptions,
) -> Result<String, EndiciaError> {
    els_request_xml("StatusRequest", "StatusList", pic, options)
}

/// Build the `<RefundRequest>` document for a single PIC.
pub(crate) fn refund_request_xml(
    pic: &str,
    options: &RequestOptions,
) -> Result<String, EndiciaError> {
    els_request_xml("RefundRequest", "RefundList", pic, options)
}

/// Build the `<CarrierPickupRequest>` document.
///
/// `auth` is the merged option map (credentials and test flag); `extras`
/// carries only the call-time address-override fields, passed through as
/// flat child elements.
pub(crate) fn carrier_pickup_request_xml(
    pic: &str,
    package_location: &str,
    auth: &RequestOptions,
    extras: &RequestOptions,
) -> Result<String, EndiciaError> {
    let mut buf = Vec::with_capacity(512);
    let mut writer = Writer::new(&mut buf);
    writer
        .create_element("CarrierPickupRequest")
        .write_inner_content(|w| -> io::Result<()> {
            write_account_block(w, auth)?;
            w.create_element("PickupList")
                .write_inner_content(|w| write_text_element(w, "PICNumber", pic))?;
            write_text_element(w, "PackageLocation", package_location)?;
            for (key, value) in extras {
                if matches!(
                    key.as_str(),
                    "AccountID" | "PassPhrase" | "Test" | "PackageLocation"
                ) {
                    continue;
                }
                write_text_element(w, key, value)?;
            }
            Ok(())
        })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// A best-effort unique request ID: the carrier's short prefix plus a
/// microsecond timestamp. Uniqueness is not enforced or deduplicated.
pub(crate) fn request_id(prefix: &str) -> String {
    format!("{}{}", prefix, Utc::now().timestamp_micros())
}

fn els_request_xml(
    root: &str,
    list: &str,
    pic: &str,
    options: &RequestOptions,
) -> Result<String, EndiciaError> {
    let mut buf = Vec::with_capacity(256);
    let mut writer = Writer::new(&mut buf);
    writer.create_element(root).write_inner_content(|w| -> io::Result<()> {
        write_account_block(w, options)?;
        w.create_element(list)
            .write_inner_content(|w| write_text_element(w, "PICNumber", pic))?;
        Ok(())
    })?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Flat `<AccountID>`/`<PassPhrase>`/`<Test>` trio used by the ELS calls.
fn write_account_block<W: Write>(w: &mut Writer<W>, options: &RequestOptions) -> io::Result<()> {
    write_text_element(w, "AccountID", option_value(options, "AccountID"))?;
    write_text_element(w, "PassPhrase", option_value(options, "PassPhrase"))?;
    write_text_element(w, "Test", options.get("Test").map_or("NO", String::as_str))?;
    Ok(())
}

/// `<RequesterID>` plus the `<CertifiedIntermediary>` credential block used
/// by the privileged account operations.
fn write_certified_intermediary<W: Write>(
    w: &mut Writer<W>,
    options: &RequestOptions,
) -> io::Result<()> {
    write_text_element(w, "RequesterID", option_value(options, "RequesterID"))?;
    w.create_element("CertifiedIntermediary")
        .write_inner_content(|w| -> io::Result<()> {
            write_text_element(w, "AccountID", option_value(options, "AccountID"))?;
            write_text_element(w, "PassPhrase", option_value(options, "PassPhrase"))?;
            Ok(())
        })?;
    Ok(())
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> io::Result<()> {
    writer
        .create_element(tag)
        .write_text_content(BytesText::new(text))?;
    Ok(())
}

fn option_value<'a>(options: &'a RequestOptions, key: &str) -> &'a str {
    options.get(key).map_or("", String::as_str)
}

fn validate_insurance(options: &RequestOptions) -> Result<(), EndiciaError> {
    let insured = match options.get("InsuredMail") {
        Some(v) => v,
        None => return Ok(()),
    };
    if insured != "Endicia" || !flag_is_set(options.get("Jewelry")) {
        return Ok(());
    }
    if let Some(zip) = options.get("ToPostalCode") {
        // Compare on the ZIP5 so ZIP+4 values are caught too.
        let zip5: String = zip.chars().take_while(|c| c.is_ascii_digit()).collect();
        if JEWELRY_EXCLUDED_ZIPS.contains(&zip5.as_str()) {
            return Err(EndiciaError::InsuranceNotAllowed(zip.clone()));
        }
    }
    Ok(())
}

fn flag_is_set(value: Option<&String>) -> bool {
    value
        .map(|v| {
            let v = v.to_uppercase();
            v == "YES" || v == "TRUE" || v == "1"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EndiciaError, RequestOptions};

    fn options(pairs: &[(&str, &str)]) -> RequestOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_attribute_keys_never_become_children() {
        let opts = options(&[
            ("Test", "YES"),
            ("LabelType", "CertifiedMail"),
            ("LabelSize", "4x6"),
            ("ImageFormat", "PNG"),
            ("ImageResolution", "300"),
            ("WeightOz", "10"),
        ]);
        let xml = label_request_xml(&opts).unwrap();

        assert!(xml.starts_with("<LabelRequest "));
        assert!(xml.contains("LabelType=\"CertifiedMail\""));
        assert!(xml.contains("Test=\"YES\""));
        assert!(xml.contains("LabelSize=\"4x6\""));
        assert!(xml.contains("ImageFormat=\"PNG\""));
        assert!(xml.contains("ImageResolution=\"300\""));
        assert!(xml.contains("<WeightOz>10</WeightOz>"));
        for tag in ["<LabelType>", "<Test>", "<LabelSize>", "<ImageFormat>", "<ImageResolution>"] {
            assert!(!xml.contains(tag), "{} leaked into children:\n{}", tag, xml);
        }
    }

    #[test]
    fn test_label_type_and_test_default_when_absent() {
        let xml = label_request_xml(&options(&[("WeightOz", "10")])).unwrap();
        assert!(xml.contains("LabelType=\"Default\""));
        assert!(xml.contains("Test=\"NO\""));
        // Optional attributes stay off entirely when absent.
        assert!(!xml.contains("LabelSize"));
    }

    #[test]
    fn test_label_nests_complete_dimension_triple() {
        let opts = options(&[("Length", "12"), ("Width", "6"), ("Height", "3")]);
        let xml = label_request_xml(&opts).unwrap();
        assert!(xml.contains(
            "<MailpieceDimensions><Length>12</Length><Width>6</Width><Height>3</Height></MailpieceDimensions>"
        ));
    }

    #[test]
    fn test_label_keeps_partial_dimensions_flat() {
        let xml = label_request_xml(&options(&[("Length", "12"), ("Width", "6")])).unwrap();
        assert!(!xml.contains("MailpieceDimensions"));
        assert!(xml.contains("<Length>12</Length>"));
        assert!(xml.contains("<Width>6</Width>"));
    }

    #[test]
    fn test_label_insured_mail_rides_on_services() {
        let xml = label_request_xml(&options(&[("InsuredMail", "Endicia")])).unwrap();
        assert!(xml.contains("<Services InsuredMail=\"Endicia\"/>"));
        assert!(!xml.contains("<InsuredMail>"));
    }

    #[test]
    fn test_jewelry_to_excluded_zip_fails_validation() {
        let opts = options(&[
            ("InsuredMail", "Endicia"),
            ("Jewelry", "true"),
            ("ToPostalCode", "10036"),
        ]);
        match label_request_xml(&opts) {
            Err(EndiciaError::InsuranceNotAllowed(zip)) => assert_eq!(zip, "10036"),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_jewelry_to_other_zip_is_allowed() {
        let opts = options(&[
            ("InsuredMail", "Endicia"),
            ("Jewelry", "true"),
            ("ToPostalCode", "99999"),
        ]);
        let xml = label_request_xml(&opts).unwrap();
        assert!(xml.contains("<Services InsuredMail=\"Endicia\"/>"));
        // The flag itself never reaches the wire.
        assert!(!xml.contains("Jewelry"));
    }

    #[test]
    fn test_jewelry_zip_plus_four_still_excluded() {
        let opts = options(&[
            ("InsuredMail", "Endicia"),
            ("Jewelry", "YES"),
            ("ToPostalCode", "94102-1234"),
        ]);
        assert!(matches!(
            label_request_xml(&opts),
            Err(EndiciaError::InsuranceNotAllowed(_))
        ));
    }

    #[test]
    fn test_third_party_insurance_skips_jewelry_rule() {
        let opts = options(&[
            ("InsuredMail", "UPIC"),
            ("Jewelry", "true"),
            ("ToPostalCode", "10036"),
        ]);
        assert!(label_request_xml(&opts).is_ok());
    }

    #[test]
    fn test_label_escapes_values() {
        let xml = label_request_xml(&options(&[("FromCompany", "Acquisitions & Sons")])).unwrap();
        assert!(xml.contains("<FromCompany>Acquisitions &amp; Sons</FromCompany>"));
    }

    #[test]
    fn test_change_pass_phrase_shape() {
        let opts = options(&[
            ("RequesterID", "abc123"),
            ("AccountID", "792190"),
            ("PassPhrase", "old secret"),
        ]);
        let xml = change_pass_phrase_request_xml("new secret", &opts).unwrap();

        assert!(xml.starts_with("<ChangePassPhraseRequest>"));
        assert!(xml.contains("<RequesterID>abc123</RequesterID>"));
        assert!(xml.contains(
            "<CertifiedIntermediary><AccountID>792190</AccountID><PassPhrase>old secret</PassPhrase></CertifiedIntermediary>"
        ));
        assert!(xml.contains("<RequestID>CPP"));
        assert!(xml.contains("<NewPassPhrase>new secret</NewPassPhrase>"));
    }

    #[test]
    fn test_buy_postage_shape() {
        let opts = options(&[("RequesterID", "abc123"), ("AccountID", "792190")]);
        let xml = buy_postage_request_xml("500", &opts).unwrap();

        assert!(xml.starts_with("<BuyPostageRequest>"));
        assert!(xml.contains("<RequestID>BP"));
        assert!(xml.contains("<RecreditAmount>500</RecreditAmount>"));
    }

    #[test]
    fn test_request_ids_carry_prefix_and_differ() {
        let a = request_id("CPP");
        let b = request_id("CPP");
        assert!(a.starts_with("CPP"));
        assert!(a.len() > "CPP".len());
        // Microsecond stamps; two consecutive builds should not collide.
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_request_shape() {
        let opts = options(&[("AccountID", "792190"), ("PassPhrase", "secret"), ("Test", "YES")]);
        let xml = status_request_xml("9400110200881234567890", &opts).unwrap();
        assert_eq!(
            xml,
            "<StatusRequest><AccountID>792190</AccountID><PassPhrase>secret</PassPhrase>\
             <Test>YES</Test><StatusList><PICNumber>9400110200881234567890</PICNumber>\
             </StatusList></StatusRequest>"
        );
    }

    #[test]
    fn test_refund_request_uses_refund_list() {
        let opts = options(&[("AccountID", "792190"), ("PassPhrase", "secret")]);
        let xml = refund_request_xml("abc", &opts).unwrap();
        assert!(xml.starts_with("<RefundRequest>"));
        assert!(xml.contains("<RefundList><PICNumber>abc</PICNumber></RefundList>"));
        assert!(xml.contains("<Test>NO</Test>"));
    }

    #[test]
    fn test_pickup_request_passes_address_overrides_through() {
        let auth = options(&[("AccountID", "792190"), ("PassPhrase", "secret"), ("Test", "NO")]);
        let extras = options(&[
            ("FirstName", "Jess"),
            ("SuiteOrApt", "Suite C"),
            ("Test", "YES"),
        ]);
        let xml = carrier_pickup_request_xml("abc123", "FrontDoor", &auth, &extras).unwrap();

        assert!(xml.starts_with("<CarrierPickupRequest>"));
        assert!(xml.contains("<PickupList><PICNumber>abc123</PICNumber></PickupList>"));
        assert!(xml.contains("<PackageLocation>FrontDoor</PackageLocation>"));
        assert!(xml.contains("<FirstName>Jess</FirstName>"));
        assert!(xml.contains("<SuiteOrApt>Suite C</SuiteOrApt>"));
        // Auth fields come from the merged map, never the extras.
        assert_eq!(xml.matches("<Test>").count(), 1);
        assert!(xml.contains("<Test>NO</Test>"));
    }
}

//! Parsers for the carrier's response documents.
//!
//! The label service and the ELS surface disagree about almost everything:
//! element naming, error signaling, and nesting. Each operation gets its own
//! narrow parser. The status and refund responses put `<Status>`,
//! `<StatusCode>`, `<IsApproved>` and per-item `<ErrorMsg>` inside the
//! `PICNumber` element's mixed content, so those fields are pulled out of
//! the raw body with regular expressions rather than the reader; this is an
//! intentional narrow extraction, not general XML support, and it assumes a
//! single tracking number per response.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::types::{Label, OperationResult, PickupConfirmation, RefundStatus, TrackingStatus};
use crate::EndiciaError;

/// Repair the carrier's scheme-less XML namespace URIs
/// (`xmlns="www.envmgr.com/..."`) before any parsing happens. URIs that
/// already carry a scheme pass through untouched.
pub(crate) fn normalize_body(body: &str) -> String {
    let re = Regex::new(r#"xmlns(:[A-Za-z0-9_]+)?="([^"]*)""#).unwrap();
    re.replace_all(body, |caps: &regex::Captures| {
        let prefix = caps.get(1).map_or("", |m| m.as_str());
        let uri = &caps[2];
        if uri.is_empty() || uri.contains("://") {
            caps[0].to_string()
        } else {
            format!(r#"xmlns{}="http://{}""#, prefix, uri)
        }
    })
    .into_owned()
}

/// Parse a `<LabelRequestResponse>` body into a [`Label`].
///
/// Provider fields map through an explicit table; anything the table does
/// not name is ignored. A body without the response node still yields a
/// `Label`, carrying only the raw request and response.
pub(crate) fn parse_label(body: &str, request_xml: &str) -> Result<Label, EndiciaError> {
    let mut label = Label {
        raw_request: request_xml.to_string(),
        raw_response: elide_label_image(body),
        ..Default::default()
    };

    let mut reader = reader_for(body);
    if !try_seek_element(&mut reader, "LabelRequestResponse")? {
        return Ok(label);
    }
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                if LABEL_FIELDS.contains(&name.as_str()) {
                    let value = read_text_content(&mut reader)?;
                    apply_label_field(&mut label, &name, value);
                } else {
                    skip_element(&mut reader)?;
                }
            }
            Event::Empty(e) => {
                let name = element_name(&e)?;
                apply_label_field(&mut label, &name, String::new());
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(label)
}

/// Parse a `<ChangePassPhraseRequestResponse>` or
/// `<BuyPostageRequestResponse>` body. Success means the carrier's `Status`
/// field is exactly "0".
pub(crate) fn parse_operation(
    body: &str,
    response_element: &str,
) -> Result<OperationResult, EndiciaError> {
    let mut result = OperationResult {
        raw_response: body.to_string(),
        ..Default::default()
    };

    let mut reader = reader_for(body);
    if !try_seek_element(&mut reader, response_element)? {
        return Ok(result);
    }
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                match name.as_str() {
                    "Status" => result.status = read_text_content(&mut reader)?,
                    "ErrorMessage" => result.error_message = Some(read_text_content(&mut reader)?),
                    _ => skip_element(&mut reader)?,
                }
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    result.success = result.status == "0";
    Ok(result)
}

/// Parse a `<StatusResponse>` body.
///
/// A top-level `<ErrorMsg>` is a carrier failure. Otherwise the status text
/// and code come out of the `PICNumber` blob by pattern extraction; a code
/// of "-1" reports an unknown tracking number (`success == false`, not an
/// error).
pub(crate) fn parse_status(body: &str) -> Result<TrackingStatus, EndiciaError> {
    let mut status = TrackingStatus {
        raw_response: body.to_string(),
        ..Default::default()
    };

    if let Some(message) = top_level_error_msg(body, "StatusResponse")? {
        status.error_message = Some(message);
        return Ok(status);
    }

    let text = extract_tag(body, "Status").ok_or_else(|| {
        EndiciaError::UnexpectedResponse("status response without a <Status> entry".to_string())
    })?;
    let code = extract_tag(body, "StatusCode").ok_or_else(|| {
        EndiciaError::UnexpectedResponse("status response without a <StatusCode> entry".to_string())
    })?;
    status.success = code != "-1";
    status.status = Some(text);
    status.status_code = Some(code);
    Ok(status)
}

/// Parse a `<RefundResponse>` body.
///
/// `<FormNumber>` is a direct child; `<IsApproved>` and the per-item
/// `<ErrorMsg>` live in the `PICNumber` blob and are pattern-extracted.
pub(crate) fn parse_refund(body: &str) -> Result<RefundStatus, EndiciaError> {
    let mut refund = RefundStatus {
        raw_response: body.to_string(),
        ..Default::default()
    };

    let mut reader = reader_for(body);
    seek_element(&mut reader, "RefundResponse")?;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                match name.as_str() {
                    "ErrorMsg" => refund.error_message = Some(read_text_content(&mut reader)?),
                    "FormNumber" => refund.form_number = read_text_content(&mut reader)?,
                    _ => skip_element(&mut reader)?,
                }
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    if refund.error_message.is_some() {
        return Ok(refund);
    }

    refund.is_approved = extract_tag(body, "IsApproved").ok_or_else(|| {
        EndiciaError::UnexpectedResponse("refund response without an <IsApproved> entry".to_string())
    })?;
    refund.success = refund.is_approved.to_uppercase() == "YES";
    if !refund.success {
        refund.error_message = extract_tag(body, "ErrorMsg");
    }
    Ok(refund)
}

/// Parse a `<CarrierPickupRequestResponse>` body.
///
/// A top-level `<ErrorMsg>` or an `<Error>` child of `<Response>` means the
/// pickup was not scheduled. On success the named fields are captured and
/// every other `<Response>` child lands in `extra` under its snake_case
/// name.
pub(crate) fn parse_pickup(body: &str) -> Result<PickupConfirmation, EndiciaError> {
    let mut pickup = PickupConfirmation {
        success: true,
        raw_response: body.to_string(),
        ..Default::default()
    };

    let mut reader = reader_for(body);
    seek_element(&mut reader, "CarrierPickupRequestResponse")?;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                match name.as_str() {
                    "ErrorMsg" => {
                        pickup.success = false;
                        pickup.error_message = Some(read_text_content(&mut reader)?);
                    }
                    "Response" => parse_pickup_response(&mut reader, &mut pickup)?,
                    _ => skip_element(&mut reader)?,
                }
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
    }
    Ok(pickup)
}

fn parse_pickup_response(
    reader: &mut Reader<&[u8]>,
    pickup: &mut PickupConfirmation,
) -> Result<(), EndiciaError> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                match name.as_str() {
                    "Error" => {
                        pickup.success = false;
                        parse_pickup_error(reader, pickup)?;
                    }
                    "DayOfWeek" => pickup.day_of_week = read_text_content(reader)?,
                    "Date" => pickup.date = read_text_content(reader)?,
                    "ConfirmationNumber" => {
                        pickup.confirmation_number = read_text_content(reader)?
                    }
                    _ => {
                        let value = read_text_content(reader)?;
                        pickup.extra.insert(pascal_to_snake(&name), value);
                    }
                }
            }
            Event::Empty(e) => {
                let name = element_name(&e)?;
                pickup.extra.insert(pascal_to_snake(&name), String::new());
            }
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(EndiciaError::UnexpectedResponse(
                    "unexpected EOF inside pickup <Response>".to_string(),
                ))
            }
            _ => {}
        }
    }
}

fn parse_pickup_error(
    reader: &mut Reader<&[u8]>,
    pickup: &mut PickupConfirmation,
) -> Result<(), EndiciaError> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                match name.as_str() {
                    "Number" => pickup.error_code = Some(read_text_content(reader)?),
                    "Description" => pickup.error_description = Some(read_text_content(reader)?),
                    _ => skip_element(reader)?,
                }
            }
            Event::End(_) => return Ok(()),
            Event::Eof => {
                return Err(EndiciaError::UnexpectedResponse(
                    "unexpected EOF inside pickup <Error>".to_string(),
                ))
            }
            _ => {}
        }
    }
}

/// Scan the depth-1 children of `root` for an `<ErrorMsg>`, skipping every
/// other subtree so a per-item `ErrorMsg` deeper down is not mistaken for a
/// top-level one.
fn top_level_error_msg(body: &str, root: &str) -> Result<Option<String>, EndiciaError> {
    let mut reader = reader_for(body);
    seek_element(&mut reader, root)?;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if element_name(&e)? == "ErrorMsg" {
                    return Ok(Some(read_text_content(&mut reader)?));
                }
                skip_element(&mut reader)?;
            }
            Event::End(_) | Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// The provider fields the label parser maps; everything else is skipped.
const LABEL_FIELDS: [&str; 12] = [
    "Status",
    "ErrorMessage",
    "Base64LabelImage",
    "TrackingNumber",
    "PIC",
    "FinalPostage",
    "TransactionID",
    "TransactionDateTime",
    "PostmarkDate",
    "PostageBalance",
    "CostCenter",
    "ReferenceID",
];

/// Explicit provider-field table for the label response. `Base64LabelImage`
/// lands in `image`; unknown fields are ignored, never an error.
fn apply_label_field(label: &mut Label, element: &str, value: String) {
    match element {
        "Status" => label.status = value,
        "ErrorMessage" => label.error_message = Some(value),
        "Base64LabelImage" => label.image = value,
        "TrackingNumber" => label.tracking_number = value,
        "PIC" => label.pic = value,
        "FinalPostage" => label.final_postage = value,
        "TransactionID" => label.transaction_id = value,
        "TransactionDateTime" => label.transaction_date_time = value,
        "PostmarkDate" => label.postmark_date = value,
        "PostageBalance" => label.postage_balance = value,
        "CostCenter" => label.cost_center = value,
        "ReferenceID" => label.reference_id = value,
        _ => {}
    }
}

/// First `<tag>text</tag>` occurrence in the raw body. The extraction
/// deliberately takes the first match only; batch responses are out of
/// scope.
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!("<{0}>([^<]*)</{0}>", tag)).unwrap();
    re.captures(body).map(|caps| caps[1].to_string())
}

fn elide_label_image(body: &str) -> String {
    let re = Regex::new(r"<Base64LabelImage>[^<]*</Base64LabelImage>").unwrap();
    re.replace(body, "<Base64LabelImage>[elided]</Base64LabelImage>")
        .into_owned()
}

fn reader_for(body: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(body.as_bytes());
    reader.config_mut().trim_text(true);
    reader
}

/// Scan forward to the opening tag of `name`, at any depth.
fn try_seek_element(reader: &mut Reader<&[u8]>, name: &str) -> Result<bool, EndiciaError> {
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if element_name(&e)? == name {
                    return Ok(true);
                }
            }
            Event::Eof => return Ok(false),
            _ => {}
        }
    }
}

fn seek_element(reader: &mut Reader<&[u8]>, name: &str) -> Result<(), EndiciaError> {
    if try_seek_element(reader, name)? {
        Ok(())
    } else {
        Err(EndiciaError::UnexpectedResponse(format!(
            "response without a <{}> element",
            name
        )))
    }
}

fn element_name(e: &BytesStart) -> Result<String, EndiciaError> {
    let name = e.name();
    let name = std::str::from_utf8(name.as_ref())
        .map_err(|err| EndiciaError::UnexpectedResponse(err.to_string()))?;
    Ok(name.to_string())
}

/// Read the text content of the current element and consume its end tag.
fn read_text_content(reader: &mut Reader<&[u8]>) -> Result<String, EndiciaError> {
    let mut text = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(e) => {
                let decoded = e
                    .decode()
                    .map_err(|err| EndiciaError::UnexpectedResponse(err.to_string()))?;
                let unescaped = quick_xml::escape::unescape(&decoded)
                    .map_err(|err| EndiciaError::UnexpectedResponse(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(_) => return Ok(text),
            Event::Eof => {
                return Err(EndiciaError::UnexpectedResponse(
                    "unexpected EOF while reading text content".to_string(),
                ))
            }
            _ => {}
        }
    }
}

/// Skip over an element and all of its children.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), EndiciaError> {
    let mut depth: u32 = 1;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => {
                return Err(EndiciaError::UnexpectedResponse(
                    "unexpected EOF while skipping element".to_string(),
                ))
            }
            _ => {}
        }
    }
}

fn pascal_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let after_lower =
                i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let before_lower = i > 0
                && i + 1 < chars.len()
                && chars[i + 1].is_ascii_lowercase()
                && chars[i - 1].is_ascii_uppercase();
            if i > 0 && (after_lower || before_lower) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

//! Document model for THREDDS catalogue XML.
//!
//! Only the parts of the (large) THREDDS schema that reconciliation needs
//! are modelled: the service tree, nested datasets with their `urlPath`,
//! advertised size and modified date, and explicit `<access>` elements.
//! Everything else in a catalogue is ignored.

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::util::errors::MirrorResult;

pub const HTTP_SERVER_SERVICE: &str = "HTTPServer";

#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "service", default)]
    pub services: Vec<Service>,
    #[serde(rename = "dataset", default)]
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@serviceType")]
    pub service_type: String,
    #[serde(rename = "@base")]
    pub base: String,
    /// Compound services nest their members.
    #[serde(rename = "service", default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    #[serde(rename = "@name", default)]
    pub name: Option<String>,
    #[serde(rename = "@ID", default)]
    pub id: Option<String>,
    #[serde(rename = "@urlPath", default)]
    pub url_path: Option<String>,
    #[serde(rename = "serviceName", default)]
    pub service_name: Option<String>,
    #[serde(rename = "dataSize", default)]
    pub data_size: Option<DataSize>,
    #[serde(rename = "date", default)]
    pub dates: Vec<TypedDate>,
    #[serde(rename = "metadata", default)]
    pub metadata: Option<Metadata>,
    #[serde(rename = "access", default)]
    pub access: Vec<Access>,
    #[serde(rename = "dataset", default)]
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    #[serde(rename = "@inherited", default)]
    pub inherited: Option<bool>,
    #[serde(rename = "serviceName", default)]
    pub service_name: Option<String>,
    #[serde(rename = "date", default)]
    pub dates: Vec<TypedDate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Access {
    #[serde(rename = "@serviceName")]
    pub service_name: String,
    #[serde(rename = "@urlPath")]
    pub url_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataSize {
    #[serde(rename = "@units")]
    pub units: String,
    #[serde(rename = "$text")]
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypedDate {
    #[serde(rename = "@type", default)]
    pub kind: Option<String>,
    #[serde(rename = "$text")]
    pub value: String,
}

impl Catalog {
    pub fn parse(xml: &str) -> MirrorResult<Catalog> {
        let catalog: Catalog =
            quick_xml::de::from_str(xml).context("failed to parse THREDDS catalogue")?;
        Ok(catalog)
    }

    /// Resolves a service reference to the base path of an
    /// HTTP-file-server endpoint. A named compound service is searched
    /// for an HTTPServer member; with no name, the first HTTPServer
    /// anywhere in the catalogue is used.
    pub fn http_server_base(&self, service_name: Option<&str>) -> Option<&str> {
        match service_name {
            Some(name) => find_service(&self.services, name).and_then(find_http_server),
            None => self.services.iter().find_map(find_http_server),
        }
    }
}

fn find_service<'a>(services: &'a [Service], name: &str) -> Option<&'a Service> {
    for service in services {
        if service.name == name {
            return Some(service);
        }
        if let Some(found) = find_service(&service.services, name) {
            return Some(found);
        }
    }
    None
}

fn find_http_server(service: &Service) -> Option<&str> {
    if service.service_type.eq_ignore_ascii_case(HTTP_SERVER_SERVICE) {
        return Some(&service.base);
    }
    service.services.iter().find_map(find_http_server)
}

impl Dataset {
    /// The service reference in effect for this dataset, before
    /// inheritance from enclosing datasets is considered.
    pub fn own_service_name(&self) -> Option<&str> {
        self.service_name
            .as_deref()
            .or_else(|| self.metadata.as_ref()?.service_name.as_deref())
    }

    /// The advertised modified timestamp in ms since epoch, if any.
    pub fn modified_millis(&self) -> Option<i64> {
        let own = self.dates.iter();
        let inherited = self.metadata.iter().flat_map(|m| m.dates.iter());
        own.chain(inherited)
            .find(|d| d.kind.as_deref() == Some("modified"))
            .and_then(|d| parse_modified(&d.value))
    }

    /// The advertised size in bytes, if any.
    pub fn size_bytes(&self) -> Option<u64> {
        self.data_size.as_ref().map(DataSize::bytes)
    }
}

impl DataSize {
    pub fn bytes(&self) -> u64 {
        let scale: f64 = match self.units.to_ascii_lowercase().as_str() {
            "bytes" => 1.0,
            "kbytes" => 1024.0,
            "mbytes" => 1024.0 * 1024.0,
            "gbytes" => 1024.0 * 1024.0 * 1024.0,
            "tbytes" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            other => {
                debug!("unrecognised dataSize units `{}`, assuming bytes", other);
                1.0
            }
        };
        (self.value * scale).round() as u64
    }
}

/// Parses a catalogue `modified` date. RFC 3339 is the common form; some
/// servers omit the zone designator, in which case UTC is assumed.
pub fn parse_modified(value: &str) -> Option<i64> {
    use time::format_description::well_known::Rfc3339;
    use time::macros::format_description;
    use time::{OffsetDateTime, PrimitiveDateTime};

    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some((dt.unix_timestamp_nanos() / 1_000_000) as i64);
    }
    let bare = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(value, &bare) {
        return Some((dt.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64);
    }
    debug!("could not parse catalogue date `{}`", value);
    None
}

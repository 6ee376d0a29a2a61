use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::hash::{Hash, Hasher};

/// Filter dimensions in subdivision order, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Jurisdiction,
    City,
    Agency,
    Doctype,
}

impl Dimension {
    /// The next finer dimension, or `None` at the finest level.
    pub fn finer(&self) -> Option<Self> {
        match self {
            Self::Jurisdiction => Some(Self::City),
            Self::City => Some(Self::Agency),
            Self::Agency => Some(Self::Doctype),
            Self::Doctype => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jurisdiction => "state",
            Self::City => "city",
            Self::Agency => "agency",
            Self::Doctype => "doctype",
        }
    }
}

/// Sort order of a paged warrant query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// A query descriptor: one filter combination plus the probed row depth
/// per dimension.
///
/// Descriptors grow one dimension at a time while the mapper drills down.
/// A descriptor is final once the depth at its most specific dimension
/// fits under the dual-order cap; `include_desc` then records whether a
/// mirrored descending query is needed to cover the 10,000-20,000 window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiMap {
    pub state: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_probe: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city_probe: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agency_probe: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctype: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctype_probe: Option<u64>,
    #[serde(default)]
    pub include_desc: bool,
}

impl ApiMap {
    pub fn new(state: u32) -> Self {
        Self {
            state,
            state_probe: None,
            city: None,
            city_probe: None,
            agency: None,
            agency_probe: None,
            doctype: None,
            doctype_probe: None,
            include_desc: false,
        }
    }

    /// Child descriptor narrowed to one city. Probes below the parent's
    /// level start unset.
    pub fn with_city(&self, city: u64) -> Self {
        let mut child = self.clone();
        child.city = Some(city);
        child.city_probe = None;
        child
    }

    pub fn with_agency(&self, agency: u64) -> Self {
        let mut child = self.clone();
        child.agency = Some(agency);
        child.agency_probe = None;
        child
    }

    pub fn with_doctype(&self, doctype: u8) -> Self {
        let mut child = self.clone();
        child.doctype = Some(doctype);
        child.doctype_probe = None;
        child
    }

    /// The most specific dimension this descriptor filters on.
    pub fn level(&self) -> Dimension {
        if self.doctype.is_some() {
            Dimension::Doctype
        } else if self.agency.is_some() {
            Dimension::Agency
        } else if self.city.is_some() {
            Dimension::City
        } else {
            Dimension::Jurisdiction
        }
    }

    /// Probed row depth at the current level, if already probed.
    pub fn depth(&self) -> Option<u64> {
        match self.level() {
            Dimension::Jurisdiction => self.state_probe,
            Dimension::City => self.city_probe,
            Dimension::Agency => self.agency_probe,
            Dimension::Doctype => self.doctype_probe,
        }
    }

    /// Record the probed depth for the current level.
    pub fn set_depth(&mut self, depth: u64) {
        match self.level() {
            Dimension::Jurisdiction => self.state_probe = Some(depth),
            Dimension::City => self.city_probe = Some(depth),
            Dimension::Agency => self.agency_probe = Some(depth),
            Dimension::Doctype => self.doctype_probe = Some(depth),
        }
    }

    /// Request payload for the API, shaped by the most specific dimension.
    /// Coarser filters stay in the body so the query narrows cumulatively.
    pub fn payload(&self) -> Value {
        let mut body = json!({
            "buscaOrgaoRecursivo": false,
            "orgaoExpeditor": {},
            "idEstado": self.state,
        });
        if let Some(city) = self.city {
            body["idMunicipio"] = json!(city);
        }
        if let Some(agency) = self.agency {
            body["orgaoExpeditor"] = json!({ "id": agency });
        }
        if let Some(doctype) = self.doctype {
            body["idTipoDocumento"] = json!(doctype);
        }
        body
    }

    /// Human-readable filter summary for logs and errors.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("state={}", self.state)];
        if let Some(city) = self.city {
            parts.push(format!("city={}", city));
        }
        if let Some(agency) = self.agency {
            parts.push(format!("agency={}", agency));
        }
        if let Some(doctype) = self.doctype {
            parts.push(format!("doctype={}", doctype));
        }
        parts.join(" ")
    }
}

/// One page returned by the warrant query endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(rename = "totalPages", default)]
    pub total_pages: u64,
    #[serde(default)]
    pub content: Vec<Value>,
}

/// (warrant id, process number) of a warrant already present in the store.
pub type SeenRef = (String, String);

/// A warrant first observed during the current run.
///
/// Identity key is the warrant id: equality and hashing ignore the other
/// fields so output sets can never hold two entries for the same id.
#[derive(Debug, Clone)]
pub struct WarrantRef {
    pub id: String,
    pub doc_type: String,
    pub process_number: String,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    /// Sanitized copy of the raw bulk row.
    pub raw: String,
}

impl PartialEq for WarrantRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WarrantRef {}

impl Hash for WarrantRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A new warrant with its sanitized detail document attached, ready for
/// staging and parsing.
#[derive(Debug, Clone)]
pub struct DetailedWarrant {
    pub bulk: WarrantRef,
    pub detail: String,
}

/// A staged warrant awaiting parsing, as read back from the store.
#[derive(Debug, Clone)]
pub struct UnparsedWarrant {
    pub scrape_date: NaiveDate,
    pub last_seen: NaiveDate,
    pub detail: String,
}

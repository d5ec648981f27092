/// FHIR search bundle wire types
///
/// Only the parts of a searchset bundle the merge export reads: paging links
/// and patient entries with their `link` element.

use serde::Deserialize;

use crate::record::{Link, LinkType, Record};

#[derive(Debug, Clone, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub total: Option<u64>,

    /// Paging links (`self`, `next`, `previous`, ...)
    #[serde(default)]
    pub link: Vec<BundleLink>,

    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleEntry {
    #[serde(default)]
    pub resource: Option<Resource>,
}

/// Entry resource, tagged by `resourceType`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    Patient(PatientResource),
    /// OperationOutcome, included resources and anything else.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientResource {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub link: Vec<PatientLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientLink {
    #[serde(default)]
    pub other: Option<Reference>,

    #[serde(rename = "type", default)]
    pub link_type: Option<LinkType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub reference: Option<String>,
}

impl Bundle {
    /// URL of the next page, if the server advertised one.
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next")
            .map(|l| l.url.as_str())
    }

    /// Patient entries converted to records, other resource types skipped.
    pub fn into_records(self) -> Vec<Record> {
        self.entry
            .into_iter()
            .filter_map(|entry| match entry.resource {
                Some(Resource::Patient(patient)) => Some(Record::from(patient)),
                _ => None,
            })
            .collect()
    }
}

impl From<PatientResource> for Record {
    fn from(patient: PatientResource) -> Self {
        let links = patient
            .link
            .into_iter()
            .map(|link| Link {
                link_type: link.link_type.unwrap_or(LinkType::Unknown),
                target_reference: link
                    .other
                    .and_then(|other| other.reference)
                    .unwrap_or_default(),
            })
            .collect();

        Record {
            id: patient.id.unwrap_or_default(),
            links,
        }
    }
}

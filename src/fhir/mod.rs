/// FHIR REST integration module
///
/// Provides the searchset bundle wire types and a paging client that serves
/// as the record source for merge exports

pub mod bundle;
pub mod client;

pub use bundle::{Bundle, BundleEntry, BundleLink, PatientLink, PatientResource, Resource};
pub use client::{FhirClient, FhirConfig};

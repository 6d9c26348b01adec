// src/data_handling/cbioportal.rs
// -----------------------------------------------------------------------------
// Blocking cBioPortal REST client. Every request is retried with exponential
// backoff; a 429 waits for the server's Retry-After instead.
// -----------------------------------------------------------------------------

use std::collections::{BTreeSet, HashMap};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use polars::prelude::*;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.cbioportal.org/api";
const MAX_ATTEMPTS: u32 = 3;
const REQUEST_DELAY: Duration = Duration::from_millis(500);

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Study {
    pub study_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MolecularProfile {
    pub molecular_profile_id: String,
    pub molecular_alteration_type: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gene {
    pub entrez_gene_id: i64,
    pub hugo_gene_symbol: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalDatum {
    pub clinical_attribute_id: String,
    pub value: String,
    #[serde(default)]
    pub sample_id: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub sample_id: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    pub entrez_gene_id: i64,
    #[serde(default)]
    pub mutation_type: Option<String>,
    #[serde(default)]
    pub protein_change: Option<String>,
    #[serde(default)]
    pub protein_pos_start: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClinicalLevel {
    Sample,
    Patient,
}

impl ClinicalLevel {
    fn query(&self) -> &'static str {
        match self {
            Self::Sample => "SAMPLE",
            Self::Patient => "PATIENT",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

pub struct CbioPortalClient {
    client: Client,
    base_url: String,
    max_attempts: u32,
}

/// Pause before the next attempt. A 429 honours a whole-second `Retry-After`;
/// everything else, including an unparseable header, backs off exponentially.
pub fn retry_wait(status: StatusCode, retry_after: Option<&str>, attempt: u32) -> Duration {
    if status != StatusCode::TOO_MANY_REQUESTS {
        return backoff_delay(attempt);
    }
    retry_after
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| backoff_delay(attempt))
}

/// Seconds to wait after failed attempt `attempt` (0-based): 1, 2, 4, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}

impl CbioPortalClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("dlbcl-analyzer/0.1"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: MAX_ATTEMPTS,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn send_with_retry<T, F>(&self, endpoint: &str, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client, &str) -> RequestBuilder,
    {
        let url = self.url(endpoint);
        let mut attempt = 0;
        loop {
            debug!("Request {} (attempt {}/{})", url, attempt + 1, self.max_attempts);
            let outcome = build(&self.client, &url).send();
            let wait = match outcome {
                Ok(response) if response.status().is_success() => {
                    thread::sleep(REQUEST_DELAY);
                    return response
                        .json::<T>()
                        .with_context(|| format!("Unexpected payload from {url}"));
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response.headers().get("Retry-After").and_then(|v| v.to_str().ok());
                    warn!("Rate limited by {}", url);
                    retry_wait(response.status(), retry_after, attempt)
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().unwrap_or_default();
                    warn!("Request failed (attempt {}/{}): {} {}", attempt + 1, self.max_attempts, status, url);
                    if attempt + 1 >= self.max_attempts {
                        return Err(anyhow!("Failed to fetch {url}. Status: {status}. Error: {body}"));
                    }
                    retry_wait(status, None, attempt)
                }
                Err(e) => {
                    warn!("Request failed (attempt {}/{}): {}", attempt + 1, self.max_attempts, e);
                    if attempt + 1 >= self.max_attempts {
                        return Err(e).with_context(|| format!("Failed to fetch {url}"));
                    }
                    backoff_delay(attempt)
                }
            };
            attempt += 1;
            if attempt >= self.max_attempts {
                return Err(anyhow!("Exceeded maximum retries for URL: {url}"));
            }
            thread::sleep(wait);
        }
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        self.send_with_retry(endpoint, |client, url| client.get(url).query(query))
    }

    fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &serde_json::Value) -> Result<T> {
        self.send_with_retry(endpoint, |client, url| client.post(url).json(body))
    }

    pub fn studies(&self) -> Result<Vec<Study>> {
        self.get("studies", &[])
    }

    pub fn molecular_profiles(&self, study_id: &str) -> Result<Vec<MolecularProfile>> {
        self.get(&format!("studies/{study_id}/molecular-profiles"), &[])
    }

    pub fn clinical_data(&self, study_id: &str, level: ClinicalLevel) -> Result<Vec<ClinicalDatum>> {
        self.get(
            &format!("studies/{study_id}/clinical-data"),
            &[("clinicalDataType", level.query())],
        )
    }

    /// Symbol → Entrez lookup; unknown symbols are silently absent.
    pub fn genes(&self, symbols: &[String]) -> Result<Vec<Gene>> {
        self.post("genes/fetch", &json!(symbols))
    }

    pub fn mutations(&self, study_id: &str, profile_id: &str, entrez_ids: &[i64]) -> Result<Vec<Mutation>> {
        let body = json!({
            "sampleListId": format!("{study_id}_all"),
            "entrezGeneIds": entrez_ids,
        });
        self.post(&format!("molecular-profiles/{profile_id}/mutations/fetch"), &body)
    }

    /// Mutations in `genes` plus sample- and patient-level clinical records.
    pub fn fetch_study(&self, study_id: &str, genes: &[String]) -> Result<StudyData> {
        info!("Fetching data for study: {}", study_id);
        let profiles = self.molecular_profiles(study_id)?;
        let profile = mutation_profile(&profiles);
        info!("  Mutation profile: {:?}", profile);

        let gene_info = self.genes(genes)?;
        let symbols: HashMap<i64, String> = gene_info
            .iter()
            .map(|g| (g.entrez_gene_id, g.hugo_gene_symbol.clone()))
            .collect();

        let mutations = match profile {
            Some(p) if !symbols.is_empty() => {
                let ids: Vec<i64> = gene_info.iter().map(|g| g.entrez_gene_id).collect();
                let m = self.mutations(study_id, p, &ids)?;
                info!("  Retrieved {} mutations", m.len());
                m
            }
            Some(_) => {
                warn!("No gene ids found for symbols: {:?}", genes);
                Vec::new()
            }
            None => Vec::new(),
        };

        let mut clinical = self.clinical_data(study_id, ClinicalLevel::Sample)?;
        clinical.extend(self.clinical_data(study_id, ClinicalLevel::Patient)?);
        info!("  Retrieved {} clinical records", clinical.len());

        Ok(StudyData {
            study_id: study_id.to_string(),
            mutations,
            symbols,
            clinical,
        })
    }
}

/// The first MUTATION_EXTENDED profile.
pub fn mutation_profile(profiles: &[MolecularProfile]) -> Option<&str> {
    profiles
        .iter()
        .find(|p| p.molecular_alteration_type == "MUTATION_EXTENDED")
        .map(|p| p.molecular_profile_id.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct StudyData {
    pub study_id: String,
    pub mutations: Vec<Mutation>,
    /// Entrez id → HUGO symbol for the requested genes.
    pub symbols: HashMap<i64, String>,
    pub clinical: Vec<ClinicalDatum>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Flattening
// ─────────────────────────────────────────────────────────────────────────────

/// One row per mutation, with the columns the classifier reads.
pub fn mutations_frame(data: &StudyData) -> PolarsResult<DataFrame> {
    let m = &data.mutations;
    let sample: Vec<&str> = m.iter().map(|r| r.sample_id.as_str()).collect();
    let patient: Vec<Option<&str>> = m.iter().map(|r| r.patient_id.as_deref()).collect();
    let gene: Vec<Option<&str>> = m
        .iter()
        .map(|r| data.symbols.get(&r.entrez_gene_id).map(String::as_str))
        .collect();
    let kind: Vec<Option<&str>> = m.iter().map(|r| r.mutation_type.as_deref()).collect();
    let change: Vec<Option<&str>> = m.iter().map(|r| r.protein_change.as_deref()).collect();
    let pos: Vec<Option<i64>> = m.iter().map(|r| r.protein_pos_start).collect();
    let study: Vec<&str> = vec![data.study_id.as_str(); m.len()];
    df![
        "sampleId" => sample,
        "patientId" => patient,
        "hugoGeneSymbol" => gene,
        "mutationType" => kind,
        "proteinChange" => change,
        "proteinPosStart" => pos,
        "study_id" => study
    ]
}

/// Long attribute records to one row per entity (sample id, else patient id)
/// and one column per attribute; the first value wins.
pub fn pivot_clinical(records: &[ClinicalDatum]) -> PolarsResult<DataFrame> {
    let id_of = |r: &ClinicalDatum| r.sample_id.clone().or_else(|| r.patient_id.clone());

    let mut ids: Vec<String> = Vec::new();
    let mut id_pos: HashMap<String, usize> = HashMap::new();
    let attributes: BTreeSet<&str> = records.iter().map(|r| r.clinical_attribute_id.as_str()).collect();
    let mut cells: HashMap<(usize, &str), &str> = HashMap::new();

    for r in records {
        let Some(id) = id_of(r) else { continue };
        let row = *id_pos.entry(id.clone()).or_insert_with(|| {
            ids.push(id);
            ids.len() - 1
        });
        cells.entry((row, r.clinical_attribute_id.as_str())).or_insert(r.value.as_str());
    }

    let mut columns: Vec<Column> = vec![Series::new("id".into(), ids.clone()).into()];
    for attr in attributes {
        let values: Vec<Option<&str>> = (0..ids.len()).map(|row| cells.get(&(row, attr)).copied()).collect();
        columns.push(Series::new(PlSmallStr::from(attr), values).into());
    }
    DataFrame::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::column_as_string;

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn rate_limit_honours_retry_after() {
        let limited = StatusCode::TOO_MANY_REQUESTS;
        assert_eq!(retry_wait(limited, Some("7"), 0), Duration::from_secs(7));
        assert_eq!(retry_wait(limited, Some(" 30 "), 3), Duration::from_secs(30));
        // HTTP-date form is not parsed
        assert_eq!(
            retry_wait(limited, Some("Wed, 21 Oct 2026 07:28:00 GMT"), 2),
            Duration::from_secs(4)
        );
        assert_eq!(retry_wait(limited, None, 1), Duration::from_secs(2));
        assert_eq!(
            retry_wait(StatusCode::SERVICE_UNAVAILABLE, Some("7"), 1),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn urls_join_cleanly() {
        let c = CbioPortalClient::new("https://example.org/api/").unwrap();
        assert_eq!(c.url("/studies"), "https://example.org/api/studies");
        assert_eq!(c.url("genes/fetch"), "https://example.org/api/genes/fetch");
    }

    #[test]
    fn payloads_deserialize_and_flatten() {
        let muts: Vec<Mutation> = serde_json::from_str(
            r#"[{"sampleId":"S1","patientId":"P1","entrezGeneId":10672,"mutationType":"Missense_Mutation",
                 "proteinChange":"L30P","proteinPosStart":30,"extraField":true},
                {"sampleId":"S2","entrezGeneId":387,"mutationType":"Nonsense_Mutation"}]"#,
        )
        .unwrap();
        let data = StudyData {
            study_id: "dlbcl_test".into(),
            mutations: muts,
            symbols: [(10672, "GNA13".to_string())].into_iter().collect(),
            clinical: Vec::new(),
        };
        let df = mutations_frame(&data).unwrap();
        assert_eq!(df.shape(), (2, 7));
        assert_eq!(
            column_as_string(&df, "hugoGeneSymbol").unwrap(),
            vec![Some("GNA13".to_string()), None]
        );

        let profiles: Vec<MolecularProfile> = serde_json::from_str(
            r#"[{"molecularProfileId":"x_gistic","molecularAlterationType":"COPY_NUMBER_ALTERATION"},
                {"molecularProfileId":"x_mutations","molecularAlterationType":"MUTATION_EXTENDED"}]"#,
        )
        .unwrap();
        assert_eq!(mutation_profile(&profiles), Some("x_mutations"));
    }

    #[test]
    fn clinical_pivot_first_value_wins() {
        let records: Vec<ClinicalDatum> = serde_json::from_str(
            r#"[{"clinicalAttributeId":"STAGE","value":"IV","sampleId":"S1","patientId":"P1"},
                {"clinicalAttributeId":"COO","value":"GCB","sampleId":"S1"},
                {"clinicalAttributeId":"STAGE","value":"I","sampleId":"S2"},
                {"clinicalAttributeId":"STAGE","value":"II","sampleId":"S1"},
                {"clinicalAttributeId":"OS_STATUS","value":"1:DECEASED","patientId":"P9"}]"#,
        )
        .unwrap();
        let wide = pivot_clinical(&records).unwrap();
        assert_eq!(wide.shape(), (3, 4));
        assert_eq!(
            column_as_string(&wide, "STAGE").unwrap(),
            vec![Some("IV".to_string()), Some("I".to_string()), None]
        );
        assert_eq!(column_as_string(&wide, "id").unwrap()[2], Some("P9".to_string()));
    }
}

// 🕸️ Filing Source - discovers filings and downloads their documents
//
// HouseClerkScraper queries the Clerk's member search per filing year and
// keeps periodic transaction report rows. Every request runs through the
// shared RetryPolicy.

use crate::config::ScraperConfig;
use crate::entities::{Chamber, Filing};
use crate::error::NetworkError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info};

/// Scraping collaborator used by the pipeline
#[async_trait]
pub trait FilingSource: Send + Sync {
    /// Filings published since the marker (latest known filing date)
    async fn fetch_new_filings(&self, since: Option<NaiveDate>) -> Result<Vec<Filing>, NetworkError>;

    async fn download_document(&self, filing: &Filing) -> Result<Vec<u8>, NetworkError>;
}

// ============================================================================
// INDEX PARSING
// ============================================================================

/// Regexes over the search result table
pub struct IndexParser {
    row: Regex,
    cell: Regex,
    link: Regex,
    tag: Regex,
}

impl IndexParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(IndexParser {
            row: Regex::new(r#"(?is)<tr[^>]*role\s*=\s*["']row["'][^>]*>(.*?)</tr>"#)?,
            cell: Regex::new(r#"(?is)<td[^>]*data-label\s*=\s*["']([^"']+)["'][^>]*>(.*?)</td>"#)?,
            link: Regex::new(r#"(?is)<a[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)?,
            tag: Regex::new(r"(?s)<[^>]*>")?,
        })
    }

    /// Filings listed in one result page
    ///
    /// Rows without a link or whose Filing cell lacks `filing_type` are skipped.
    /// Rows without a date cell are dated `scraped_on`.
    pub fn parse(
        &self,
        html: &str,
        base_url: &str,
        filing_type: &str,
        scraped_on: NaiveDate,
    ) -> Vec<Filing> {
        let mut filings = Vec::new();

        for row in self.row.captures_iter(html) {
            let row_html = &row[1];

            let Some(link) = self.link.captures(row_html) else {
                continue;
            };
            let href = link[1].trim();
            let member_name = self.text(&link[2]);

            let mut kind = None;
            let mut office = None;
            let mut year = None;
            let mut date = None;
            for cell in self.cell.captures_iter(row_html) {
                let value = self.text(&cell[2]);
                match cell[1].trim() {
                    "Filing" => kind = Some(value),
                    "Office" => office = Some(value),
                    "Filing Year" => year = value.parse::<i32>().ok(),
                    "Filing Date" | "Date" => {
                        date = NaiveDate::parse_from_str(&value, "%m/%d/%Y").ok()
                    }
                    _ => {}
                }
            }

            let Some(kind) = kind.filter(|k| k.contains(filing_type)) else {
                continue;
            };

            let document_url = if href.starts_with("http") {
                href.to_string()
            } else {
                format!(
                    "{}/{}",
                    base_url.trim_end_matches('/'),
                    href.trim_start_matches('/')
                )
            };
            let filing_id = document_id(&document_url);
            if filing_id.is_empty() || member_name.is_empty() {
                debug!(href, "skipping index row without id or member");
                continue;
            }

            let mut filing = Filing::discovered(
                filing_id,
                member_name,
                Chamber::House,
                date.unwrap_or(scraped_on),
                document_url,
            )
            .with_filing_type(kind, year);
            if let Some(office) = office.filter(|o| !o.is_empty()) {
                filing = filing.with_office(office);
            }
            filings.push(filing);
        }

        filings
    }

    fn text(&self, html: &str) -> String {
        let stripped = self.tag.replace_all(html, " ");
        decode_entities(&stripped)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Last path segment of a document link, without `.pdf`
pub fn document_id(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    last.trim_end_matches(".pdf").to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ============================================================================
// HOUSE CLERK SCRAPER
// ============================================================================

pub struct HouseClerkScraper {
    client: reqwest::Client,
    base_url: String,
    filing_type: String,
    retry: RetryPolicy,
    parser: IndexParser,
}

impl HouseClerkScraper {
    pub fn new(config: &ScraperConfig, retry: RetryPolicy) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(retry.timeout)
            .build()
            .map_err(|e| NetworkError::new("build_http_client", 0, e.to_string()))?;
        let parser = IndexParser::new()
            .map_err(|e| NetworkError::new("compile_index_parser", 0, e.to_string()))?;

        Ok(HouseClerkScraper {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            filing_type: config.filing_type.clone(),
            retry,
            parser,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/FinancialDisclosure/ViewMemberSearchResult", self.base_url)
    }

    async fn fetch_year(&self, year: i32) -> Result<Vec<Filing>, NetworkError> {
        let client = &self.client;
        let url = self.search_url();
        let url = url.as_str();

        let html = self
            .retry
            .execute("fetch_filing_index", move || {
                let form = [("FilingYear", year.to_string())];
                async move {
                    let response = client.post(url).form(&form).send().await?;
                    response.error_for_status()?.text().await
                }
            })
            .await?;

        let filings = self
            .parser
            .parse(&html, &self.base_url, &self.filing_type, Utc::now().date_naive());
        info!(year, found = filings.len(), "filing index fetched");
        Ok(filings)
    }
}

#[async_trait]
impl FilingSource for HouseClerkScraper {
    async fn fetch_new_filings(&self, since: Option<NaiveDate>) -> Result<Vec<Filing>, NetworkError> {
        let current_year = Utc::now().year();
        let first_year = since.map_or(current_year, |date| date.year().min(current_year));

        let mut seen = HashSet::new();
        let mut filings = Vec::new();
        for year in first_year..=current_year {
            for filing in self.fetch_year(year).await? {
                if seen.insert(filing.filing_id.clone()) {
                    filings.push(filing);
                }
            }
        }
        Ok(filings)
    }

    async fn download_document(&self, filing: &Filing) -> Result<Vec<u8>, NetworkError> {
        let client = &self.client;
        let url = filing.document_url.as_str();

        let bytes = self
            .retry
            .execute("download_document", move || async move {
                let response = client.get(url).send().await?;
                response.error_for_status()?.bytes().await
            })
            .await?;

        debug!(filing_id = %filing.filing_id, bytes = bytes.len(), "document downloaded");
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_HTML: &str = r#"
<table>
  <tr role="row"><th>Name</th><th>Office</th></tr>
  <tr role="row">
    <td data-label="Name"><a href="public_disc/ptr-pdfs/2024/20024512.pdf" target="_blank">Pelosi, Hon.. Nancy</a></td>
    <td data-label="Office">CA11</td>
    <td data-label="Filing Year">2024</td>
    <td data-label="Filing">PTR Original</td>
  </tr>
  <tr role="row">
    <td data-label="Name"><a href="public_disc/financial-pdfs/2024/10059999.pdf">Smith, Hon.. Adam</a></td>
    <td data-label="Office">WA09</td>
    <td data-label="Filing Year">2024</td>
    <td data-label="Filing">FD Original</td>
  </tr>
  <tr role="row">
    <td data-label="Name"><a href="/public_disc/ptr-pdfs/2024/20024600.pdf">O&#39;Neil, Hon.. Pat</a></td>
    <td data-label="Office">NY03</td>
    <td data-label="Filing Year">2024</td>
    <td data-label="Filing Date">03/02/2024</td>
    <td data-label="Filing">PTR Amendment</td>
  </tr>
</table>"#;

    fn scraped_on() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    #[test]
    fn test_parse_keeps_ptr_rows() {
        let filings = IndexParser::new().unwrap().parse(
            INDEX_HTML,
            "https://disclosures-clerk.house.gov",
            "PTR",
            scraped_on(),
        );
        assert_eq!(filings.len(), 2);

        let first = &filings[0];
        assert_eq!(first.filing_id, "20024512");
        assert_eq!(first.member_name, "Pelosi, Hon.. Nancy");
        assert_eq!(first.office.as_deref(), Some("CA11"));
        assert_eq!(first.filing_year, Some(2024));
        assert_eq!(first.filing_type.as_deref(), Some("PTR Original"));
        assert_eq!(first.filing_date, scraped_on());
        assert_eq!(
            first.document_url,
            "https://disclosures-clerk.house.gov/public_disc/ptr-pdfs/2024/20024512.pdf"
        );
        assert_eq!(first.chamber, Chamber::House);
    }

    #[test]
    fn test_parse_uses_date_cell_and_decodes_names() {
        let filings = IndexParser::new().unwrap().parse(
            INDEX_HTML,
            "https://disclosures-clerk.house.gov/",
            "PTR",
            scraped_on(),
        );

        let second = &filings[1];
        assert_eq!(second.member_name, "O'Neil, Hon.. Pat");
        assert_eq!(second.filing_date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(
            second.document_url,
            "https://disclosures-clerk.house.gov/public_disc/ptr-pdfs/2024/20024600.pdf"
        );
    }

    #[test]
    fn test_document_id() {
        assert_eq!(document_id("https://x.test/a/b/20024512.pdf"), "20024512");
        assert_eq!(document_id("https://x.test/a/b/20024512.pdf?download=1"), "20024512");
        assert_eq!(document_id("20024512"), "20024512");
    }

    #[test]
    fn test_empty_page() {
        let filings = IndexParser::new()
            .unwrap()
            .parse("<html></html>", "https://x.test", "PTR", scraped_on());
        assert!(filings.is_empty());
    }
}

//! Table rendering of a [`Report`].
//!
//! # Feature Flag
//!
//! This module requires the `table` feature:
//!
//! ```toml
//! [dependencies]
//! regioni = { version = "0.1", features = ["table"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use regioni::report::table::{TableRenderer, TableStyle};
//!
//! let report = regioni::global().snapshot()?;
//! println!("{}", TableRenderer::new().with_style(TableStyle::Sharp).render(&report));
//! // ┌────────┬────────┬──────────────┬───────┬───────┐
//! // │ Thread │ Region │ Counter      │ Total │ Reads │
//! // ├────────┼────────┼──────────────┼───────┼───────┤
//! // │ 1      │ solve  │ region_count │ 3     │       │
//! // │ 1      │ solve  │ cycles       │ 9000  │ 1200  │
//! // └────────┴────────┴──────────────┴───────┴───────┘
//! ```

use tabled::{settings::Style, Table, Tabled};

use crate::report::Report;

/// Available table styles for rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableStyle {
    /// ASCII table with simple characters: +, -, |
    Ascii,
    /// Modern rounded corners (default)
    #[default]
    Rounded,
    /// Sharp corners with box-drawing characters
    Sharp,
    /// GitHub-flavored Markdown table
    Markdown,
    /// No borders, just spacing
    Blank,
}

#[derive(Tabled)]
struct CounterRow {
    #[tabled(rename = "Thread")]
    thread: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Counter")]
    counter: String,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Reads")]
    reads: String,
}

/// Renders a report as one row per (thread, region, counter).
#[derive(Debug, Clone, Default)]
pub struct TableRenderer {
    style: TableStyle,
    title: Option<String>,
}

impl TableRenderer {
    /// Creates a renderer with the rounded style and no title.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the table style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.style = style;
        self
    }

    /// Sets a title printed above the table.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn apply_style(&self, table: &mut Table) {
        match self.style {
            TableStyle::Ascii => {
                table.with(Style::ascii());
            }
            TableStyle::Rounded => {
                table.with(Style::rounded());
            }
            TableStyle::Sharp => {
                table.with(Style::sharp());
            }
            TableStyle::Markdown => {
                table.with(Style::markdown());
            }
            TableStyle::Blank => {
                table.with(Style::blank());
            }
        }
    }

    /// Renders the report. The header line also lists the clock rate.
    pub fn render(&self, report: &Report) -> String {
        let rows: Vec<CounterRow> = report
            .threads
            .iter()
            .flat_map(|thread| {
                thread.regions.iter().flat_map(move |region| {
                    region.counters.iter().map(move |counter| CounterRow {
                        thread: thread.id.to_string(),
                        region: region.name.clone(),
                        counter: counter.name.clone(),
                        total: counter.total.to_string(),
                        reads: counter
                            .reads
                            .iter()
                            .map(i64::to_string)
                            .collect::<Vec<_>>()
                            .join(" "),
                    })
                })
            })
            .collect();

        let mut table = Table::new(&rows);
        self.apply_style(&mut table);

        let clock = format!("cpu in mhz: {}", report.cpu_in_mhz);
        match &self.title {
            Some(title) => format!("{title}\n{clock}\n{table}"),
            None => format!("{clock}\n{table}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CounterReport, RegionReport, ThreadReport};

    fn report() -> Report {
        Report {
            cpu_in_mhz: 2400,
            threads: vec![ThreadReport {
                id: 4,
                regions: vec![RegionReport {
                    name: "solve".to_string(),
                    counters: vec![
                        CounterReport {
                            name: "region_count".to_string(),
                            total: 3,
                            reads: Vec::new(),
                        },
                        CounterReport {
                            name: "cycles".to_string(),
                            total: 9000,
                            reads: vec![1200, 2500],
                        },
                    ],
                }],
            }],
        }
    }

    #[test]
    fn test_render_rows() {
        let output = TableRenderer::new().render(&report());
        assert!(output.starts_with("cpu in mhz: 2400"));
        assert!(output.contains("Region"));
        assert!(output.contains("solve"));
        assert!(output.contains("region_count"));
        assert!(output.contains("9000"));
        assert!(output.contains("1200 2500"));
    }

    #[test]
    fn test_render_with_title() {
        let output = TableRenderer::new()
            .with_title("PAPI-HL Output:")
            .render(&report());
        assert!(output.starts_with("PAPI-HL Output:\n"));
    }

    #[test]
    fn test_render_styles() {
        let ascii = TableRenderer::new()
            .with_style(TableStyle::Ascii)
            .render(&report());
        assert!(ascii.contains('+'));
        let markdown = TableRenderer::new()
            .with_style(TableStyle::Markdown)
            .render(&report());
        assert!(markdown.contains('|'));
    }

    #[test]
    fn test_render_empty() {
        let empty = Report {
            cpu_in_mhz: 1,
            threads: Vec::new(),
        };
        let output = TableRenderer::new().render(&empty);
        assert!(output.contains("Thread"));
    }
}

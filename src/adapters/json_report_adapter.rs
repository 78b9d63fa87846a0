//! JSON report adapter implementing ReportPort.

use crate::domain::error::ForecastError;
use crate::domain::report::RunReport;
use crate::ports::report_port::ReportPort;

pub struct JsonReportAdapter {
    pretty: bool,
}

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self { pretty: true }
    }

    pub fn compact() -> Self {
        Self { pretty: false }
    }
}

impl Default for JsonReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for JsonReportAdapter {
    fn render(&self, report: &RunReport) -> Result<String, ForecastError> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(report)
        } else {
            serde_json::to_string(report)
        };
        let mut text = rendered.map_err(|e| ForecastError::Data {
            reason: format!("failed to serialize report: {e}"),
        })?;
        text.push('\n');
        Ok(text)
    }
}

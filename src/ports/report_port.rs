//! Report emission port trait.

use crate::domain::error::ForecastError;
use crate::domain::report::RunReport;
use std::path::Path;

pub trait ReportPort {
    fn render(&self, report: &RunReport) -> Result<String, ForecastError>;

    fn write(&self, report: &RunReport, output_path: &Path) -> Result<(), ForecastError> {
        let content = self.render(report)?;
        std::fs::write(output_path, content)?;
        Ok(())
    }
}

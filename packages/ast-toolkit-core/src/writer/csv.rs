use crate::Result;
use crate::audit::AuditEvent;
use std::path::Path;

pub(super) fn write_csv(records: &[AuditEvent], path: &Path) -> Result<()> {
    let mut writer = ::csv::Writer::from_path(path)?;
    writer.write_record(AuditEvent::COLUMNS)?;
    for record in records {
        writer.write_record(record.row())?;
    }
    writer.flush()?;
    Ok(())
}

use super::SHEET_NAME;
use crate::Result;
use crate::audit::AuditEvent;
use rust_xlsxwriter::{Format, Workbook};
use std::path::Path;

/// Single worksheet, bold frozen header, every populated cell a string.
pub(super) fn write_xlsx(records: &[AuditEvent], path: &Path) -> Result<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    for (col, name) in (0u16..).zip(AuditEvent::COLUMNS) {
        sheet.write_string_with_format(0, col, name, &header)?;
    }

    for (row, record) in (1u32..).zip(records) {
        for (col, value) in (0u16..).zip(record.row()) {
            // Blank cells read back as empty, same as an empty CSV field
            if !value.is_empty() {
                sheet.write_string(row, col, value)?;
            }
        }
    }
    sheet.set_freeze_panes(1, 0)?;

    workbook.save(path)?;
    Ok(())
}

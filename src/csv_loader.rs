use crate::error::{DigitError, Result};
use crate::types::ManifestEntry;
use csv::ReaderBuilder;
use std::path::Path;

const COL_ORIGIN: usize = 0;
const COL_GROUP: usize = 1;
const COL_LABEL: usize = 2;
const COL_FILE: usize = 3;

/// ラベルマニフェストを読み込む
///
/// ヘッダー行は特別扱いしない（origin列が対象と一致しないため、ビルダーで除外される）。
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| DigitError::Manifest(format!("{}: {e}", path.display())))?;

    let mut entries = Vec::new();

    for (line, result) in reader.records().enumerate() {
        let record =
            result.map_err(|e| DigitError::Manifest(format!("{}: {e}", path.display())))?;

        let column = |index: usize| {
            record.get(index).map(str::to_string).ok_or_else(|| {
                DigitError::Manifest(format!(
                    "{}:{}: expected 4 columns, found {}",
                    path.display(),
                    line + 1,
                    record.len()
                ))
            })
        };

        entries.push(ManifestEntry {
            origin: column(COL_ORIGIN)?,
            group: column(COL_GROUP)?,
            label: column(COL_LABEL)?,
            file: column(COL_FILE)?,
        });
    }

    Ok(entries)
}

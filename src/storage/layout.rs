//! On-disk layout of blobs
//!
//! `<storage_root>/<YYYY>/<MM>/<YYMMDDHHMMSS>_<document_id>_<sanitized name>`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::revision::DocumentId;

/// Year/month bucket for content created at `created_at`.
pub fn bucket_path(root: &Path, created_at: DateTime<Utc>) -> PathBuf {
    root.join(created_at.format("%Y").to_string())
        .join(created_at.format("%m").to_string())
}

/// Second-resolution timestamp used as the blob name prefix.
pub fn blob_timestamp(now: DateTime<Utc>) -> String {
    now.format("%y%m%d%H%M%S").to_string()
}

pub fn blob_name(timestamp: &str, document_id: DocumentId, sanitized_name: &str) -> String {
    format!("{}_{}_{}", timestamp, document_id, sanitized_name)
}

/// Bucket implied by the timestamp prefix of a blob name.
///
/// Blob names carry a two-digit year, read as 20YY.
pub fn bucket_from_blob_name(root: &Path, blob_name: &str) -> Option<PathBuf> {
    let prefix = blob_name.get(..4)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month = &prefix[2..4];
    if !matches!(month, "01" | "02" | "03" | "04" | "05" | "06" | "07" | "08" | "09" | "10" | "11" | "12") {
        return None;
    }
    Some(root.join(format!("20{}", &prefix[..2])).join(month))
}

/// Lexicographic successor of a digit string, carrying leftwards
/// (`"0959"` -> `"0960"`, `"99"` -> `"100"`).
pub fn next_timestamp(timestamp: &str) -> String {
    let mut digits: Vec<u8> = timestamp.bytes().collect();
    for digit in digits.iter_mut().rev() {
        if *digit == b'9' {
            *digit = b'0';
        } else if digit.is_ascii_digit() {
            *digit += 1;
            return String::from_utf8_lossy(&digits).into_owned();
        }
    }
    let mut carried = String::with_capacity(digits.len() + 1);
    carried.push('1');
    carried.push_str(&String::from_utf8_lossy(&digits));
    carried
}

/// Reduce a display file name to something safe to use on disk.
///
/// Any directory part is dropped (both `/` and `\` count as separators), then
/// every character other than ASCII alphanumerics, `_`, `.` and `-` becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    let just_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    just_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bucket_path() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        assert_eq!(
            bucket_path(Path::new("/data"), at),
            PathBuf::from("/data/2024/03")
        );
    }

    #[test]
    fn test_blob_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 10, 4, 5).unwrap();
        let ts = blob_timestamp(at);
        assert_eq!(ts, "240309100405");
        assert_eq!(blob_name(&ts, DocumentId(17), "a.txt"), "240309100405_17_a.txt");
    }

    #[test]
    fn test_bucket_from_blob_name() {
        assert_eq!(
            bucket_from_blob_name(Path::new("/data"), "240309100405_17_a.txt"),
            Some(PathBuf::from("/data/2024/03"))
        );
        assert_eq!(bucket_from_blob_name(Path::new("/data"), "241309_1_a"), None);
        assert_eq!(bucket_from_blob_name(Path::new("/data"), "ab"), None);
    }

    #[test]
    fn test_next_timestamp_carries() {
        assert_eq!(next_timestamp("240309100405"), "240309100406");
        assert_eq!(next_timestamp("240309100409"), "240309100410");
        assert_eq!(next_timestamp("99"), "100");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report v2 (final).pdf"), "report_v2__final_.pdf");
        assert_eq!(sanitize_filename("dir/sub/name.txt"), "name.txt");
        assert_eq!(sanitize_filename("C:\\docs\\plan-b.odt"), "plan-b.odt");
        assert_eq!(sanitize_filename("ünï.txt"), "_n_.txt");
    }
}

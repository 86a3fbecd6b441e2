use rollcall_core::AttendanceEntry;
use std::fmt::Write;

/// Render filtered records as an aligned table followed by a count line.
pub fn table(hits: &[&AttendanceEntry], total: usize) -> String {
    let mut out = String::new();
    if hits.is_empty() {
        let _ = writeln!(out, "No records found");
    } else {
        let id_w = hits.iter().map(|e| e.id.len()).max().unwrap_or(0).max(2);
        let _ = writeln!(out, "{:<10}  {:<8}  {:<id_w$}  NAME", "DATE", "TIME", "ID");
        for e in hits {
            let _ = writeln!(
                out,
                "{:<10}  {:<8}  {:<id_w$}  {}",
                e.date_iso(),
                e.timestamp.format("%H:%M:%S"),
                e.id,
                e.name
            );
        }
    }
    let _ = writeln!(out, "{} of {} entries", hits.len(), total);
    out
}

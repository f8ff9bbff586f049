use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::corpus::{CorpusSummary, SearchHit};
use crate::sync::{RunOutcome, SyncReport, Termination};

const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 56;
const DATE_WIDTH: usize = 16;
const SCORE_WIDTH: usize = 5;
const FOLDER_WIDTH: usize = 28;

pub fn format_search_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No emails found.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<from$}  {:<subject$}  {:<date$}  {:>score$}\n",
        "From",
        "Subject",
        "Date",
        "Score",
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH,
        score = SCORE_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(SCORE_WIDTH)
    ));

    for hit in hits {
        out.push_str(&pad(&truncate_for_width(&hit.record.from, FROM_WIDTH), FROM_WIDTH));
        out.push_str("  ");
        out.push_str(&pad(
            &truncate_for_width(&hit.record.subject, SUBJECT_WIDTH),
            SUBJECT_WIDTH,
        ));
        out.push_str("  ");
        out.push_str(&format!(
            "{:<date$}  {:>score$}\n",
            hit.record.date.format("%Y-%m-%d %H:%M"),
            hit.score,
            date = DATE_WIDTH,
            score = SCORE_WIDTH
        ));
        if let Some(snippet) = &hit.snippet {
            out.push_str(&format!("    {}\n", snippet.replace('\n', " ")));
        }
    }

    out
}

pub fn format_summary(summary: &CorpusSummary) -> String {
    if summary.total_records == 0 {
        return "No records found.".to_string();
    }

    let mut out = String::new();
    out.push_str("Corpus Summary\n");
    out.push_str("==============\n");
    out.push_str(&format!("Records:       {}\n", summary.total_records));
    out.push_str(&format!("Words:         {}\n", summary.total_words));
    out.push_str(&format!("Avg words:     {:.1}\n", summary.average_words));
    if let (Some(earliest), Some(latest)) = (summary.earliest, summary.latest) {
        out.push_str(&format!(
            "Date range:    {} .. {}\n",
            earliest.format("%Y-%m-%d"),
            latest.format("%Y-%m-%d")
        ));
    }

    if !summary.top_senders.is_empty() {
        out.push('\n');
        out.push_str("Top senders\n");
        out.push_str("-----------\n");
        for sender in &summary.top_senders {
            out.push_str(&pad(&truncate_for_width(&sender.sender, 40), 40));
            out.push_str(&format!(" {:>6}\n", sender.count));
        }
    }

    out
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Sync {} ({})\n", report.run_id, report.backend));
    out.push_str(&format!("Records written:     {}\n", report.records_written));
    out.push_str(&format!("Attachments written: {}\n", report.attachments_written));
    out.push_str(&format!("Duplicates skipped:  {}\n", report.duplicates_skipped));

    if !report.folders.is_empty() {
        out.push('\n');
        out.push_str(&format!(
            "{:<folder$}  {:>7}  {:>7}  {:>7}  Outcome\n",
            "Folder",
            "Fetched",
            "Records",
            "Attach",
            folder = FOLDER_WIDTH
        ));
        out.push_str(&format!(
            "{}  -------  -------  -------  ---------------\n",
            "-".repeat(FOLDER_WIDTH)
        ));
        for folder in &report.folders {
            out.push_str(&pad(&truncate_for_width(&folder.folder, FOLDER_WIDTH), FOLDER_WIDTH));
            out.push_str(&format!(
                "  {:>7}  {:>7}  {:>7}  {}\n",
                folder.fetched,
                folder.records_written,
                folder.attachments_written,
                termination_label(&folder.termination)
            ));
        }
    }

    if report.errors.is_empty() {
        out.push_str("\nErrors: 0\n");
    } else {
        out.push_str(&format!("\nErrors: {}\n", report.errors.len()));
        for error in &report.errors {
            out.push_str(&format!("- {error}\n"));
        }
    }

    if report.cancelled {
        out.push_str("Run was cancelled before completion.\n");
    }
    match report.outcome() {
        RunOutcome::Written => {}
        RunOutcome::NoMatches => out.push_str("No messages matched.\n"),
        RunOutcome::NothingWritten => out.push_str("No output written.\n"),
    }

    out
}

fn termination_label(termination: &Termination) -> &'static str {
    match termination {
        Termination::AllConsumed => "complete",
        Termination::CapReached => "cap reached",
        Termination::PerFolderLimit => "folder limit",
        Termination::SafetyLimit => "page ceiling",
        Termination::Cancelled => "cancelled",
        Termination::Missing => "not found",
        Termination::Failed(_) => "failed",
    }
}

/// Left-align to a display width; `format!` pads by chars, not columns.
fn pad(value: &str, width: usize) -> String {
    let used = UnicodeWidthStr::width(value);
    let mut out = value.to_string();
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}

//! Flattened, human-readable projection of every session.
//!
//! Recomputed from the whole table on each call. Rows whose start or end value cannot
//! be resolved under any known encoding are skipped with a warning; the rest of the
//! export still goes out.

use chrono::TimeZone;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, TrackerError};
use crate::store::{SessionRecord, SessionStore};

pub const ONGOING_MARKER: &str = " (ongoing)";

const HEADER: [&str; 6] = ["ID", "Project", "Activity", "Start Time", "End Time", "Duration"];
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedSession {
    pub id: i64,
    pub project: String,
    /// Empty when the row never recorded one.
    pub activity: String,
    /// `None` for legacy rows written without a start; their time columns stay blank.
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// `end - start` when closed, `now - start` when open; never negative.
    pub duration_secs: Option<i64>,
}

impl ProjectedSession {
    pub fn is_ongoing(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_none()
    }

    pub fn duration_label(&self) -> String {
        let Some(duration) = self.duration_secs else {
            return String::new();
        };
        let mut label = format_duration(duration);
        if self.is_ongoing() {
            label.push_str(ONGOING_MARKER);
        }
        label
    }

    fn csv_record<Tz: TimeZone>(&self, tz: &Tz) -> [String; 6]
    where
        Tz::Offset: Display,
    {
        [
            self.id.to_string(),
            self.project.clone(),
            self.activity.clone(),
            self.start_time
                .map(|start| format_local(start, tz))
                .unwrap_or_default(),
            self.end_time
                .map(|end| format_local(end, tz))
                .unwrap_or_default(),
            self.duration_label(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    pub sessions: Vec<ProjectedSession>,
    pub skipped: usize,
}

/// Projects `records` (in the given order) at `now`. Text timestamps are read in `tz`.
pub fn project_sessions<Tz: TimeZone>(
    records: &[SessionRecord],
    now: i64,
    tz: &Tz,
) -> Projection {
    let mut projection = Projection::default();

    for record in records {
        match project_record(record, now, tz) {
            Ok(session) => projection.sessions.push(session),
            Err(err) => {
                warn!(id = record.id, error = %err, "Skipping session with unreadable timestamp");
                projection.skipped += 1;
            }
        }
    }

    projection
}

fn project_record<Tz: TimeZone>(
    record: &SessionRecord,
    now: i64,
    tz: &Tz,
) -> Result<ProjectedSession> {
    let project = record.project.clone().unwrap_or_default();
    let activity = record.activity.clone().unwrap_or_default();

    let Some(stored_start) = record.start_time.as_ref() else {
        return Ok(ProjectedSession {
            id: record.id,
            project,
            activity,
            start_time: None,
            end_time: None,
            duration_secs: None,
        });
    };

    let start_time = stored_start.to_epoch(tz)?;
    let end_time = record
        .end_time
        .as_ref()
        .map(|stored| stored.to_epoch(tz))
        .transpose()?;

    Ok(ProjectedSession {
        id: record.id,
        project,
        activity,
        start_time: Some(start_time),
        end_time,
        duration_secs: Some((end_time.unwrap_or(now) - start_time).max(0)),
    })
}

/// `HH:MM:SS`; hours grow past two digits rather than wrapping.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_local<Tz: TimeZone>(secs: i64, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    match tz.timestamp_opt(secs, 0).earliest() {
        Some(dt) => dt.format(DISPLAY_FORMAT).to_string(),
        None => secs.to_string(),
    }
}

/// Writes the projection as CSV to `writer`.
pub fn render_csv<W: Write, Tz: TimeZone>(writer: W, projection: &Projection, tz: &Tz) -> Result<()>
where
    Tz::Offset: Display,
{
    let csv_error = |source: csv::Error| TrackerError::Csv {
        context: "Failed to write export".to_string(),
        source,
    };

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADER).map_err(csv_error)?;
    for session in &projection.sessions {
        wtr.write_record(session.csv_record(tz)).map_err(csv_error)?;
    }
    wtr.flush()
        .map_err(|err| TrackerError::io("Failed to flush export", err))
}

/// Replaces the export file at `path` atomically.
pub fn write_csv<Tz: TimeZone>(path: &Path, projection: &Projection, tz: &Tz) -> Result<()>
where
    Tz::Offset: Display,
{
    let parent_dir = path.parent().ok_or_else(|| {
        TrackerError::io(
            "Export path has no parent directory",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        )
    })?;
    fs_err::create_dir_all(parent_dir)
        .map_err(|err| TrackerError::io("Failed to create export directory", err))?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|err| TrackerError::io("Failed to create temp export file", err))?;
    render_csv(&mut temp_file, projection, tz)?;
    temp_file
        .persist(path)
        .map_err(|err| TrackerError::io("Failed to replace export file", err.error))?;
    Ok(())
}

/// Reads every session from `store` and rewrites the export at `path` in local time.
pub fn export_store(store: &SessionStore, path: &Path, now: i64) -> Result<Projection> {
    let records = store.list_all_sessions()?;
    let projection = project_sessions(&records, now, &chrono::Local);
    write_csv(path, &projection, &chrono::Local)?;
    debug!(
        rows = projection.sessions.len(),
        skipped = projection.skipped,
        path = %path.display(),
        "Export written"
    );
    Ok(projection)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub project: String,
    pub sessions: usize,
    pub total_secs: i64,
    pub ongoing: bool,
}

impl ProjectSummary {
    /// Hours in tenths, always rounded up (6 minutes and 1 second bills as 0.2).
    pub fn billable_tenths(&self) -> i64 {
        let secs = self.total_secs.max(0);
        (secs + 359) / 360
    }

    pub fn billable_hours_label(&self) -> String {
        let tenths = self.billable_tenths();
        format!("{}.{}", tenths / 10, tenths % 10)
    }
}

/// Totals per project, alphabetical. Ongoing sessions count up to the projection's
/// `now`.
pub fn summarize_by_project(projection: &Projection) -> Vec<ProjectSummary> {
    let mut totals: BTreeMap<&str, ProjectSummary> = BTreeMap::new();
    for session in &projection.sessions {
        let entry = totals
            .entry(session.project.as_str())
            .or_insert_with(|| ProjectSummary {
                project: session.project.clone(),
                sessions: 0,
                total_secs: 0,
                ongoing: false,
            });
        entry.sessions += 1;
        entry.total_secs += session.duration_secs.unwrap_or(0);
        entry.ongoing |= session.is_ongoing();
    }
    totals.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::StoredTime;
    use chrono::Utc;

    fn at(secs: i64) -> Option<StoredTime> {
        Some(StoredTime::EpochSeconds(secs))
    }

    fn record(id: i64, start: Option<StoredTime>, end: Option<StoredTime>) -> SessionRecord {
        SessionRecord {
            id,
            project: Some("Acme".to_string()),
            activity: Some("Research".to_string()),
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn closed_session_duration() {
        let records = [record(1, at(1_000), at(1_600))];
        let projection = project_sessions(&records, 5_000, &Utc);
        assert_eq!(projection.sessions[0].duration_label(), "00:10:00");
    }

    #[test]
    fn open_session_is_marked_ongoing() {
        let records = [record(2, at(1_000), None)];
        let projection = project_sessions(&records, 1_000 + 95, &Utc);
        assert_eq!(projection.sessions[0].duration_label(), "00:01:35 (ongoing)");
    }

    #[test]
    fn text_timestamps_are_projected() {
        let records = [record(
            3,
            Some(StoredTime::LocalDatetime("2024-03-01 09:00:00.250000".to_string())),
            Some(StoredTime::LocalDatetime("2024-03-01 10:30:00".to_string())),
        )];
        let projection = project_sessions(&records, 0, &Utc);
        assert_eq!(projection.skipped, 0);
        assert_eq!(projection.sessions[0].duration_secs, Some(5_400));
    }

    #[test]
    fn unparseable_rows_are_skipped() {
        let records = [
            record(1, at(1_000), at(1_060)),
            record(2, Some(StoredTime::LocalDatetime("yesterday".to_string())), None),
            record(3, at(1_000), Some(StoredTime::LocalDatetime("later".to_string()))),
        ];
        let projection = project_sessions(&records, 2_000, &Utc);
        assert_eq!(projection.sessions.len(), 1);
        assert_eq!(projection.skipped, 2);
    }

    #[test]
    fn legacy_rows_keep_blank_columns() {
        let records = [
            SessionRecord {
                project: Some("Legacy".to_string()),
                activity: None,
                ..record(1, at(0), at(60))
            },
            record(2, None, None),
        ];
        let projection = project_sessions(&records, 2_000, &Utc);
        assert_eq!(projection.skipped, 0);
        assert_eq!(projection.sessions.len(), 2);
        assert!(!projection.sessions[1].is_ongoing());

        let mut out = Vec::new();
        render_csv(&mut out, &projection, &Utc).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[1],
            "1,Legacy,,1970-01-01 00:00:00,1970-01-01 00:01:00,00:01:00"
        );
        assert_eq!(lines[2], "2,Acme,Research,,,");
    }

    #[test]
    fn negative_durations_saturate() {
        let records = [record(1, at(2_000), at(1_000))];
        let projection = project_sessions(&records, 0, &Utc);
        assert_eq!(projection.sessions[0].duration_label(), "00:00:00");
    }

    #[test]
    fn renders_csv_with_header() {
        let records = [record(1, at(0), at(3_600)), record(2, at(3_600), None)];
        let projection = project_sessions(&records, 3_700, &Utc);
        let mut out = Vec::new();
        render_csv(&mut out, &projection, &Utc).expect("render");

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "ID,Project,Activity,Start Time,End Time,Duration");
        assert_eq!(
            lines[1],
            "1,Acme,Research,1970-01-01 00:00:00,1970-01-01 01:00:00,01:00:00"
        );
        assert_eq!(
            lines[2],
            "2,Acme,Research,1970-01-01 01:00:00,,00:01:40 (ongoing)"
        );
    }

    #[test]
    fn write_csv_replaces_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("time_entries.csv");
        fs_err::write(&path, "stale").expect("seed");

        let projection = project_sessions(&[record(1, at(0), at(60))], 0, &Utc);
        write_csv(&path, &projection, &Utc).expect("write");
        let text = fs_err::read_to_string(&path).expect("read");
        assert!(text.starts_with("ID,Project"));
        assert!(text.contains("00:01:00"));
    }

    #[test]
    fn export_store_projects_every_row() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SessionStore::open(temp_dir.path().join(".timetrack.db")).expect("store");
        store.open_session("Acme", "Research", 1_000).expect("open");
        store.close_open_session(1_600).expect("close");
        store.open_session("Globex", "File Review", 2_000).expect("open");

        let path = temp_dir.path().join("time_entries.csv");
        let projection = export_store(&store, &path, 2_030).expect("export");
        assert_eq!(projection.sessions.len(), 2);
        assert!(projection.sessions[1].is_ongoing());
        assert!(path.exists());
    }

    #[test]
    fn summary_rounds_up_to_tenths() {
        let records = [
            record(1, at(0), at(360)),
            record(2, at(1_000), at(1_001)),
            SessionRecord {
                project: Some("Globex".to_string()),
                ..record(3, at(0), at(5_400))
            },
        ];
        let summaries = summarize_by_project(&project_sessions(&records, 0, &Utc));
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].project, "Acme");
        assert_eq!(summaries[0].total_secs, 361);
        assert_eq!(summaries[0].billable_hours_label(), "0.2");
        assert_eq!(summaries[1].billable_hours_label(), "1.5");
    }
}

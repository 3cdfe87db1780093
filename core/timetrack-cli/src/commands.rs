use chrono::{DateTime, Local};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use timetrack_core::config::get_custom_activities_path;
use timetrack_core::{
    format_duration, load_settings, player_from_settings, project_sessions, resolve_data_folder,
    summarize_by_project, ActivityCatalog, CacheFile, Chimer, Clock, DataPaths, IntervalTicks,
    OpenSession, Result, SystemClock, Tracker, TrackerSettings, WatchPlan, DEFAULT_ACTIVITY,
};

const DATA_DIR_ENV: &str = "TIMETRACK_DATA_DIR";

pub struct Context {
    paths: DataPaths,
    settings: TrackerSettings,
}

impl Context {
    pub fn load(data_dir: Option<PathBuf>, settings_path: Option<PathBuf>) -> Result<Self> {
        let explicit = data_dir.or_else(|| {
            env::var_os(DATA_DIR_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });
        let root = resolve_data_folder(explicit.as_deref())?;
        let settings = load_settings(settings_path)?;
        tracing::debug!(data_dir = %root.display(), "Using data folder");

        Ok(Context {
            paths: DataPaths::new(root),
            settings,
        })
    }

    fn tracker(&self, chime: bool) -> Result<Tracker<SystemClock>> {
        let chimer = chime.then(|| {
            Chimer::from_settings(
                &self.paths,
                &self.settings,
                player_from_settings(&self.settings),
            )
        });
        Tracker::open(&self.paths, &self.settings, SystemClock, chimer)
    }
}

fn catalog() -> ActivityCatalog {
    match get_custom_activities_path() {
        Some(path) => ActivityCatalog::load(&path),
        None => ActivityCatalog::new_in_memory(),
    }
}

fn format_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| secs.to_string())
}

fn remember_activity(activity: &str) {
    if let Err(err) = catalog().add(activity) {
        tracing::warn!(error = %err, "Failed to save custom activity");
    }
}

fn describe(session: &OpenSession, now: i64) -> String {
    format!(
        "{} / {} since {} ({})",
        session.project,
        session.activity,
        format_time(session.start_time),
        format_duration(now - session.start_time)
    )
}

pub fn start(context: &Context, project: &str, activity: Option<&str>, chime: bool) -> Result<()> {
    let mut tracker = context.tracker(chime)?;
    let activity = activity.unwrap_or(DEFAULT_ACTIVITY);
    let session = tracker.start(project, activity)?;
    remember_activity(&session.activity);

    println!("Started {}", describe(&session, session.start_time));
    tracker.finish();
    Ok(())
}

pub fn stop(context: &Context, chime: bool) -> Result<()> {
    let mut tracker = context.tracker(chime)?;
    let previous = tracker.view().open_session().cloned();
    let sealed = tracker.stop()?;

    match previous {
        Some(session) if sealed > 0 => println!(
            "Stopped {} after {}",
            session.project,
            format_duration(tracker.now() - session.start_time)
        ),
        _ if sealed > 0 => println!("Stopped"),
        _ => println!("Not tracking"),
    }
    tracker.finish();
    Ok(())
}

pub fn switch(context: &Context, project: &str, activity: Option<&str>) -> Result<()> {
    let mut tracker = context.tracker(false)?;
    let activity = match activity {
        Some(value) => value.to_string(),
        None => tracker
            .view()
            .open_session()
            .map(|session| session.activity.clone())
            .unwrap_or_else(|| DEFAULT_ACTIVITY.to_string()),
    };

    let session = tracker.switch_project(project, &activity)?;
    remember_activity(&session.activity);
    println!("Switched to {}", describe(&session, session.start_time));
    Ok(())
}

pub fn change_activity(context: &Context, activity: &str) -> Result<()> {
    let mut tracker = context.tracker(false)?;
    if tracker.change_activity(activity)? == 0 {
        println!("Not tracking");
        return Ok(());
    }
    remember_activity(activity);
    if let Some(session) = tracker.view().open_session() {
        println!("Now {}", describe(session, tracker.now()));
    }
    Ok(())
}

pub fn change_project(context: &Context, project: &str, activity: Option<&str>) -> Result<()> {
    let mut tracker = context.tracker(false)?;
    if tracker.change_project(project, activity)? == 0 {
        println!("Not tracking");
        return Ok(());
    }
    if let Some(activity) = activity {
        remember_activity(activity);
    }
    if let Some(session) = tracker.view().open_session() {
        println!("Now {}", describe(session, tracker.now()));
    }
    Ok(())
}

pub fn status(context: &Context, json: bool, cached: bool) -> Result<()> {
    let now = SystemClock.now();

    if cached {
        let cache = CacheFile::new(&context.paths, context.settings.lock_policy());
        match cache.read()? {
            Some(snapshot) if json => println!(
                "{}",
                serde_json::json!({
                    "is_tracking": snapshot.is_tracking,
                    "project": snapshot.project,
                    "activity": snapshot.activity,
                    "start_time": snapshot.start_time,
                    "last_updated": snapshot.last_updated,
                    "age_secs": snapshot.age(now),
                })
            ),
            Some(snapshot) => {
                let age = snapshot.age(now);
                match (snapshot.is_tracking, snapshot.project, snapshot.start_time) {
                    (true, Some(project), Some(start_time)) => println!(
                        "{} since {} (cached {}s ago)",
                        project,
                        format_time(start_time),
                        age
                    ),
                    _ => println!("Not tracking (cached {age}s ago)"),
                }
            }
            None if json => println!("null"),
            None => println!("No cached status"),
        }
        return Ok(());
    }

    let mut tracker = context.tracker(false)?;
    let open = tracker.status()?;
    if json {
        let value = match &open {
            Some(session) => serde_json::json!({
                "is_tracking": true,
                "id": session.id,
                "project": session.project,
                "activity": session.activity,
                "start_time": session.start_time,
                "elapsed_secs": (now - session.start_time).max(0),
            }),
            None => serde_json::json!({ "is_tracking": false }),
        };
        println!("{value}");
    } else {
        match &open {
            Some(session) => println!("Tracking {}", describe(session, now)),
            None => println!("Not tracking"),
        }
    }
    Ok(())
}

pub fn projects(context: &Context, include_hidden: bool) -> Result<()> {
    let tracker = context.tracker(false)?;
    for project in tracker.projects(include_hidden)? {
        println!("{project}");
    }
    Ok(())
}

pub fn activities(add: Option<&str>) -> Result<()> {
    let mut catalog = catalog();
    if let Some(activity) = add {
        if catalog.add(activity)? {
            println!("Added {}", activity.trim());
        } else {
            println!("{} already listed", activity.trim());
        }
        return Ok(());
    }
    for activity in catalog.all() {
        println!("{activity}");
    }
    Ok(())
}

pub fn export(context: &Context) -> Result<()> {
    let tracker = context.tracker(false)?;
    let projection = tracker.export()?;
    println!(
        "Exported {} sessions to {}",
        projection.sessions.len(),
        context.paths.export.display()
    );
    if projection.skipped > 0 {
        println!("Skipped {} sessions with unreadable timestamps", projection.skipped);
    }
    Ok(())
}

pub fn report(context: &Context) -> Result<()> {
    let tracker = context.tracker(false)?;
    let records = tracker.store().list_all_sessions()?;
    let projection = project_sessions(&records, tracker.now(), &Local);

    for summary in summarize_by_project(&projection) {
        println!(
            "{}\t{}\t{}{}",
            summary.project,
            summary.sessions,
            summary.billable_hours_label(),
            if summary.ongoing { " (ongoing)" } else { "" }
        );
    }
    Ok(())
}

pub fn watch(context: &Context, duration: Option<u64>) -> Result<()> {
    let mut tracker = context.tracker(true)?;
    let stop = Arc::new(AtomicBool::new(false));

    if let Some(secs) = duration {
        let stop = stop.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            stop.store(true, Ordering::SeqCst);
        });
    }

    let mut ticks = IntervalTicks::new(context.settings.tick_interval(), stop);
    let summary = timetrack_core::watch::run(
        &mut tracker,
        &WatchPlan::from_settings(&context.settings),
        &mut ticks,
    );
    tracing::info!(
        syncs = summary.syncs,
        exports = summary.exports,
        failures = summary.failures,
        "Watch finished"
    );
    Ok(())
}

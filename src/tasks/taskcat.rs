use log::{error, info};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::modules::raid_protection::detector::BurstDetector;

static TASK_MUTEX: Lazy<Mutex<i32>> = Lazy::new(|| Mutex::new(0));

#[derive(EnumIter, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Task {
    SweepWindows,
}

impl Task {
    /// Whether or not the task is enabled
    pub fn enabled(&self) -> bool {
        match self {
            Task::SweepWindows => true,
        }
    }

    /// How often the task should run
    pub fn duration(&self) -> Duration {
        match self {
            Task::SweepWindows => Duration::from_secs(300),
        }
    }

    /// Description of the task
    pub fn description(&self) -> &'static str {
        match self {
            Task::SweepWindows => "Evicting idle detection windows",
        }
    }

    /// Function to run the task
    pub async fn run(&self, detector: &Arc<BurstDetector>) -> Result<(), crate::Error> {
        match self {
            Task::SweepWindows => crate::tasks::sweep_windows::sweep_windows(detector).await,
        }
    }
}

/// Function to start all tasks
pub async fn start_all_tasks(detector: Arc<BurstDetector>) -> ! {
    // Start tasks
    let mut set = JoinSet::new();

    for task in Task::iter() {
        if !task.enabled() {
            continue;
        }

        set.spawn(crate::tasks::taskcat::taskcat(detector.clone(), task));
    }

    if let Some(res) = set.join_next().await {
        if let Err(e) = res {
            error!("Error while running task: {}", e);
        }

        info!("Task finished when it shouldn't have");
        std::process::abort();
    }

    info!("All tasks finished when they shouldn't have");
    std::process::abort();
}

/// Function that manages a task
async fn taskcat(detector: Arc<BurstDetector>, task: Task) -> ! {
    let duration = task.duration();
    let description = task.description();

    // Skip the tick at startup; there is nothing to sweep yet
    tokio::time::sleep(duration).await;

    let mut interval = tokio::time::interval(duration);

    loop {
        interval.tick().await;

        let guard = TASK_MUTEX.lock().await;

        log::info!(
            "TASK: {} ({}s interval) [{}]",
            task.to_string(),
            duration.as_secs(),
            description
        );

        if let Err(e) = task.run(&detector).await {
            log::error!("TASK {} ERROR'd: {:?}", task.to_string(), e);
        }

        drop(guard);
    }
}

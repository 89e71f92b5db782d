use std::{
    sync::Arc,
    time::Duration,
};
use futures::{
    select,
    stream::{
        FuturesUnordered,
        StreamExt,
    },
};
use log::{error, info, warn};
use tokio_stream::wrappers::IntervalStream;
use tracing::{info_span, Instrument};

use crate::{
    config::WorkerSettings,
    job::JobState,
    queue::JobQueue,
    supervisor::Supervisor,
};

// a failed run gets exactly one more attempt, with a fresh run token but the
// same directories so the engine can resume
pub async fn run_with_retry(supervisor: &Supervisor, job_id: &str) -> anyhow::Result<JobState> {
    match supervisor.run(job_id).await {
        Ok(state) => Ok(state),

        Err(e) => {
            warn!("Job `{job_id}` failed, retrying once: `{e:?}`");
            supervisor.run(job_id).await
        },
    }
}

// dequeues jobs and runs up to `concurrency` of them side by side
pub async fn serve(
    supervisor: Arc<Supervisor>,
    queue: JobQueue,
    settings: &WorkerSettings,
) -> anyhow::Result<()> {
    let concurrency = settings.concurrency.max(1);
    let mut timer_poll_queue = IntervalStream::new(
        tokio::time::interval(Duration::from_millis(settings.idle_poll_ms))
    ).fuse();
    let mut running_jobs = FuturesUnordered::new();
    info!("Serving jobs, at most `{concurrency}` at a time.");

    loop {
        select! {
            // pick up new work if there is room for it
            _ = timer_poll_queue.select_next_some() => {
                while running_jobs.len() < concurrency {
                    let job_id = match queue.pop().await {
                        Ok(Some(job_id)) => job_id,

                        Ok(None) => break,

                        Err(e) => {
                            warn!("Failed to poll the job queue: `{e:?}`");
                            break
                        },
                    };
                    info!("Picked up job `{job_id}`.");
                    let supervisor = supervisor.clone();
                    let span = info_span!("job", id = %job_id);
                    running_jobs.push(
                        async move {
                            let res = run_with_retry(&supervisor, &job_id).await;
                            (job_id, res)
                        }
                        .instrument(span)
                    );
                }
            },

            (job_id, res) = running_jobs.select_next_some() => {
                match res {
                    Ok(state) => info!("Job `{job_id}` ended as `{state}`."),

                    Err(e) => error!("Job `{job_id}` failed after a retry: `{e:?}`"),
                }
            },
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        store::JobStore,
        supervisor::fixtures::Harness,
    };

    #[tokio::test]
    async fn failed_run_is_retried_once_in_the_same_directories() {
        let h = Harness::new(r#"
echo attempt >> "$ROOTDIR/attempts"
if [ ! -f "$ROOTDIR/failed-once" ]; then
  touch "$ROOTDIR/failed-once"
  touch "$NXF_WORK/cached-task"
  exit 1
fi
# the second attempt must see the first one's engine cache
[ -f "$NXF_WORK/cached-task" ] || exit 5
exit 0
"#);
        let job = h.submit(None).await;
        let state = run_with_retry(&h.supervisor, &job.id).await.unwrap();
        assert_eq!(state, JobState::Succeeded);
        let attempts = std::fs::read_to_string(h.root.path().join("attempts")).unwrap();
        assert_eq!(attempts.lines().count(), 2);
        let job = h.store.load(&job.id).await.unwrap();
        assert_eq!(job.state, JobState::Succeeded);

        let dirs = &h.config.directories;
        assert_eq!(std::fs::read_dir(&dirs.jobs).unwrap().count(), 1);
        assert!(dirs.jobs.join(&job.id).is_dir());
        assert_eq!(std::fs::read_dir(&dirs.work).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&dirs.temp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn retry_gives_up_after_second_failure() {
        let h = Harness::new("echo attempt >> \"$ROOTDIR/attempts\"\nexit 2\n");
        let job = h.submit(None).await;
        assert!(run_with_retry(&h.supervisor, &job.id).await.is_err());
        let attempts = std::fs::read_to_string(h.root.path().join("attempts")).unwrap();
        assert_eq!(attempts.lines().count(), 2);
        assert_eq!(h.store.load(&job.id).await.unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn success_is_not_repeated() {
        let h = Harness::new("echo attempt >> \"$ROOTDIR/attempts\"\nexit 0\n");
        let job = h.submit(None).await;
        assert_eq!(run_with_retry(&h.supervisor, &job.id).await.unwrap(), JobState::Succeeded);
        let attempts = std::fs::read_to_string(h.root.path().join("attempts")).unwrap();
        assert_eq!(attempts.lines().count(), 1);
    }
}

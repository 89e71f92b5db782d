use log::info;

// fifo of job ids waiting for a worker, kept in a redis list
#[derive(Clone)]
pub struct JobQueue {
    con: redis::aio::MultiplexedConnection,
    key: String,
}

impl JobQueue {
    pub fn new(con: redis::aio::MultiplexedConnection, key: &str) -> Self {
        Self {
            con: con,
            key: key.to_string(),
        }
    }

    pub async fn push(&self, job_id: &str) -> anyhow::Result<()> {
        let mut con = self.con.clone();
        let len: u64 = redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(job_id)
            .query_async(&mut con)
            .await?;
        info!("Queued job `{job_id}`, `{len}` waiting.");
        Ok(())
    }

    pub async fn pop(&self) -> anyhow::Result<Option<String>> {
        let mut con = self.con.clone();
        let job_id: Option<String> = redis::cmd("LPOP")
            .arg(&self.key)
            .query_async(&mut con)
            .await?;
        Ok(job_id)
    }
}

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mongodb::bson::{self, doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use crate::error::{ConveyorError, Result};
use crate::job::{JobId, JobRecord, JobStatus};

use super::{lease_cutoff, JobStore, StatusUpdate, StoreOp};

/// MongoDB-backed store.
///
/// The claim maps directly onto `findOneAndUpdate`: the server atomically
/// picks the lowest `_id` matching the eligibility filter, applies the
/// claim update, and hands back the new document. That server-side
/// atomicity is the whole mutual-exclusion story; the process adds nothing.
pub struct MongoStore {
    coll: Collection<JobRow>,
}

impl MongoStore {
    pub fn new(db: &Database, collection: &str) -> Self {
        Self {
            coll: db.collection(collection),
        }
    }
}

/// On-disk document shape. Ids are stored as hyphenated UUID strings so the
/// natural `_id` sort matches creation order.
#[derive(Debug, Serialize, Deserialize)]
struct JobRow {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    params: Bson,
    status: JobStatus,
    created: BsonDateTime,
    delayed: BsonDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started: Option<BsonDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ended: Option<BsonDateTime>,
    attempts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Bson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl JobRow {
    fn from_record(record: &JobRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            params: bson::to_bson(&record.params)?,
            status: record.status,
            created: BsonDateTime::from_chrono(record.created),
            delayed: BsonDateTime::from_chrono(record.delayed),
            started: record.started.map(BsonDateTime::from_chrono),
            ended: record.ended.map(BsonDateTime::from_chrono),
            attempts: i64::from(record.attempts),
            result: record.result.as_ref().map(bson::to_bson).transpose()?,
            error: record.error.clone(),
            reason: record.reason.clone(),
        })
    }

    fn into_record(self) -> Result<JobRecord> {
        let id = self
            .id
            .parse::<JobId>()
            .map_err(|_| ConveyorError::Store(format!("invalid job id: {}", self.id)))?;

        Ok(JobRecord {
            id,
            name: self.name,
            params: self.params.into_relaxed_extjson(),
            status: self.status,
            created: self.created.to_chrono(),
            delayed: self.delayed.to_chrono(),
            started: self.started.map(|at| at.to_chrono()),
            ended: self.ended.map(|at| at.to_chrono()),
            attempts: self.attempts.max(0) as u32,
            result: self.result.map(Bson::into_relaxed_extjson),
            error: self.error,
            reason: self.reason,
        })
    }
}

fn update_doc(update: &StatusUpdate) -> Result<Document> {
    let mut set = doc! {
        "status": update.status.as_str(),
        "ended": BsonDateTime::from_chrono(update.ended),
    };
    if let Some(delayed) = update.delayed {
        set.insert("delayed", BsonDateTime::from_chrono(delayed));
    }
    if let Some(result) = &update.result {
        set.insert("result", bson::to_bson(result)?);
    }
    if let Some(error) = &update.error {
        set.insert("error", error);
    }
    if let Some(reason) = &update.reason {
        set.insert("reason", reason);
    }
    Ok(doc! { "$set": set })
}

#[async_trait]
impl JobStore for MongoStore {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        self.coll.insert_one(JobRow::from_record(record)?).await?;
        Ok(())
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut first_err: Option<ConveyorError> = None;
        let mut inserts = Vec::new();
        let mut updates = Vec::new();

        for op in ops {
            match op {
                StoreOp::Insert(record) => match JobRow::from_record(&record) {
                    Ok(row) => inserts.push(row),
                    Err(err) => {
                        first_err.get_or_insert(err);
                    }
                },
                StoreOp::Update { id, update } => updates.push((id, update)),
            }
        }

        if !inserts.is_empty() {
            if let Err(err) = self.coll.insert_many(&inserts).ordered(false).await {
                first_err.get_or_insert(err.into());
            }
        }

        for (id, update) in updates {
            if let Err(err) = self.update(id, update).await {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn find(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = self.coll.find_one(doc! { "_id": id.to_string() }).await?;
        row.map(JobRow::into_record).transpose()
    }

    async fn claim(&self, names: &[String], lease_timeout: Duration) -> Result<Option<JobRecord>> {
        let now = Utc::now();
        let cutoff = lease_cutoff(now, lease_timeout);
        let names: Vec<Bson> = names.iter().map(|name| Bson::String(name.clone())).collect();

        let filter = doc! {
            "name": { "$in": names },
            "$or": [
                {
                    "status": { "$in": [JobStatus::Enqueued.as_str(), JobStatus::Failed.as_str()] },
                    "delayed": { "$lte": BsonDateTime::from_chrono(now) },
                },
                {
                    "status": JobStatus::Dequeued.as_str(),
                    "started": { "$lte": BsonDateTime::from_chrono(cutoff) },
                },
            ],
        };
        let update = doc! {
            "$set": {
                "status": JobStatus::Dequeued.as_str(),
                "started": BsonDateTime::from_chrono(now),
            },
            "$inc": { "attempts": 1_i64 },
        };

        let row = self
            .coll
            .find_one_and_update(filter, update)
            .sort(doc! { "_id": 1 })
            .return_document(ReturnDocument::After)
            .await?;
        row.map(JobRow::into_record).transpose()
    }

    async fn update(&self, id: JobId, update: StatusUpdate) -> Result<()> {
        let result = self
            .coll
            .update_one(doc! { "_id": id.to_string() }, update_doc(&update)?)
            .await?;
        if result.matched_count == 0 {
            return Err(ConveyorError::JobNotFound(id));
        }
        Ok(())
    }

    async fn ensure_indexes(&self, retention: Option<Duration>) -> Result<()> {
        self.coll
            .create_index(IndexModel::builder().keys(doc! { "name": 1 }).build())
            .await?;
        self.coll
            .create_index(IndexModel::builder().keys(doc! { "status": 1 }).build())
            .await?;

        // TTL purge of settled jobs. This removes failed ones as well: their
        // `ended` marks the last attempt, so a failed job past its retry
        // window disappears with everything else.
        if let Some(retention) = retention {
            self.coll
                .create_index(
                    IndexModel::builder()
                        .keys(doc! { "ended": 1 })
                        .options(IndexOptions::builder().expire_after(retention).build())
                        .build(),
                )
                .await?;
        }

        Ok(())
    }
}

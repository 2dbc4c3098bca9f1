//! Same-week conflict hints

use std::sync::Arc;

use crate::error::Result;
use crate::gateway::Outbound;
use crate::models::{SlotDate, Worker};
use crate::repository::ScheduleRepository;

/// A duty the worker already holds on the date they would move into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SameWeekConflict {
    pub collection_name: String,
    pub duty_type: String,
}

pub struct ConflictAdvisor {
    repo: Arc<dyn ScheduleRepository>,
}

impl ConflictAdvisor {
    pub fn new(repo: Arc<dyn ScheduleRepository>) -> Self {
        Self { repo }
    }

    /// Duties `worker` already holds on exactly `date`, across their collections
    pub async fn same_week_conflicts(
        &self,
        worker: &Worker,
        date: SlotDate,
    ) -> Result<Vec<SameWeekConflict>> {
        let mut conflicts = Vec::new();

        for (collection_id, held) in &worker.duties {
            let Some(slot) = self.repo.get_slot(collection_id, date).await? else {
                continue;
            };
            let collection_name = match self.repo.get_collection(collection_id).await? {
                Some(collection) => collection.display_name(),
                None => collection_id.clone(),
            };

            for duty_type in held {
                if slot.is_assigned(duty_type, &worker.name) {
                    conflicts.push(SameWeekConflict {
                        collection_name: collection_name.clone(),
                        duty_type: duty_type.clone(),
                    });
                }
            }
        }

        Ok(conflicts)
    }

    /// Advisory message for `worker` moving into `date`, if anything clashes
    pub async fn advisory(&self, worker: &Worker, date: SlotDate) -> Result<Option<Outbound>> {
        let conflicts = self.same_week_conflicts(worker, date).await?;
        Ok(render_advisory(date, &conflicts))
    }
}

fn render_advisory(date: SlotDate, conflicts: &[SameWeekConflict]) -> Option<Outbound> {
    if conflicts.is_empty() {
        return None;
    }
    let list = conflicts
        .iter()
        .map(|c| format!("{} - {}", c.collection_name, c.duty_type))
        .collect::<Vec<_>>()
        .join("\n");
    Some(Outbound::text(format!(
        "Heads up: on {} you are also serving\n{}\nMake sure you can do both.",
        date.short(),
        list
    )))
}

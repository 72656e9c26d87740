use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;

use super::constants::{DEFAULT_PLAN_NAME, DEFAULT_PLAN_USER_COUNT, TRIAL_DAYS};
use super::models::{Owner, TrialStatus};

/// key: billing-plan-service -> plan transitions on an owner
///
/// Writes go through the caller's connection so a handler can group them in one
/// transaction. The borrowed owner is kept in step with the row.
pub struct PlanService<'o> {
    owner: &'o mut Owner,
}

impl<'o> PlanService<'o> {
    pub fn new(owner: &'o mut Owner) -> Self {
        Self { owner }
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.owner.plan.as_deref()
    }

    pub fn plan_user_count(&self) -> Option<i32> {
        self.owner.plan_user_count
    }

    pub fn trial_status(&self, now: DateTime<Utc>) -> TrialStatus {
        self.owner.trial_status(now)
    }

    /// Drops the owner back to the free tier and forgets the subscription.
    pub async fn set_default_plan_data(&mut self, conn: &mut PgConnection) -> sqlx::Result<()> {
        tracing::info!(ownerid = self.owner.ownerid, "setting plan to default");
        sqlx::query(
            r#"
            UPDATE owners
            SET plan = $2,
                plan_user_count = $3,
                plan_activated_users = NULL,
                stripe_subscription_id = NULL,
                updatestamp = NOW()
            WHERE ownerid = $1
            "#,
        )
        .bind(self.owner.ownerid)
        .bind(DEFAULT_PLAN_NAME)
        .bind(DEFAULT_PLAN_USER_COUNT)
        .execute(&mut *conn)
        .await?;

        self.owner.plan = Some(DEFAULT_PLAN_NAME.to_string());
        self.owner.plan_user_count = Some(DEFAULT_PLAN_USER_COUNT);
        self.owner.plan_activated_users = None;
        self.owner.stripe_subscription_id = None;
        Ok(())
    }

    pub async fn update_plan(
        &mut self,
        conn: &mut PgConnection,
        name: Option<&str>,
        user_count: Option<i32>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE owners SET plan = $2, plan_user_count = $3, updatestamp = NOW() WHERE ownerid = $1",
        )
        .bind(self.owner.ownerid)
        .bind(name)
        .bind(user_count)
        .execute(&mut *conn)
        .await?;

        self.owner.plan = name.map(str::to_string);
        self.owner.plan_user_count = user_count;
        Ok(())
    }

    /// Records a trial window starting at `now`. Returns `false` when a trial was
    /// already recorded for this owner.
    pub async fn start_trial(
        &mut self,
        conn: &mut PgConnection,
        now: DateTime<Utc>,
    ) -> sqlx::Result<bool> {
        if self.trial_status(now) != TrialStatus::NotStarted {
            return Ok(false);
        }
        let end = now + Duration::days(TRIAL_DAYS);
        sqlx::query(
            r#"
            UPDATE owners
            SET trial_start_date = $2, trial_end_date = $3, updatestamp = NOW()
            WHERE ownerid = $1
            "#,
        )
        .bind(self.owner.ownerid)
        .bind(now)
        .bind(end)
        .execute(&mut *conn)
        .await?;

        self.owner.trial_start_date = Some(now);
        self.owner.trial_end_date = Some(end);
        Ok(true)
    }
}

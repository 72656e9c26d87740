use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// key: billing-owner-model -> account aggregate the reconciler mutates
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Owner {
    pub ownerid: i32,
    pub service: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub plan: Option<String>,
    pub plan_user_count: Option<i32>,
    pub plan_activated_users: Option<Vec<i32>>,
    pub plan_auto_activate: bool,
    pub delinquent: bool,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub trial_start_date: Option<DateTime<Utc>>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub admins: Vec<i32>,
    pub organizations: Vec<i32>,
    pub updatestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    NotStarted,
    Ongoing,
    Expired,
}

impl Owner {
    pub fn trial_status(&self, now: DateTime<Utc>) -> TrialStatus {
        match (self.trial_start_date, self.trial_end_date) {
            (None, _) => TrialStatus::NotStarted,
            (Some(_), Some(end)) if end > now => TrialStatus::Ongoing,
            (Some(_), None) => TrialStatus::Ongoing,
            (Some(_), Some(_)) => TrialStatus::Expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn owner() -> Owner {
        Owner {
            ownerid: 1,
            service: "github".into(),
            username: Some("codecov".into()),
            email: None,
            plan: Some("users-basic".into()),
            plan_user_count: Some(1),
            plan_activated_users: None,
            plan_auto_activate: true,
            delinquent: false,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            trial_start_date: None,
            trial_end_date: None,
            admins: Vec::new(),
            organizations: Vec::new(),
            updatestamp: Utc::now(),
        }
    }

    #[test]
    fn trial_status_follows_recorded_window() {
        let now = Utc::now();
        let mut owner = owner();
        assert_eq!(owner.trial_status(now), TrialStatus::NotStarted);

        owner.trial_start_date = Some(now - Duration::days(1));
        owner.trial_end_date = Some(now + Duration::days(13));
        assert_eq!(owner.trial_status(now), TrialStatus::Ongoing);

        owner.trial_end_date = Some(now - Duration::seconds(1));
        assert_eq!(owner.trial_status(now), TrialStatus::Expired);
    }
}

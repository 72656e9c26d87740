use sqlx::PgConnection;

use super::models::Owner;

/// key: billing-owner-store -> correlation lookups and bulk updates
pub async fn find_by_stripe_ids(
    conn: &mut PgConnection,
    customer_id: &str,
    subscription_id: Option<&str>,
) -> sqlx::Result<Option<Owner>> {
    sqlx::query_as::<_, Owner>(
        r#"
        SELECT * FROM owners
        WHERE stripe_customer_id = $1
          AND stripe_subscription_id IS NOT DISTINCT FROM $2
        FOR UPDATE
        "#,
    )
    .bind(customer_id)
    .bind(subscription_id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn find_by_id(conn: &mut PgConnection, ownerid: i32) -> sqlx::Result<Option<Owner>> {
    sqlx::query_as::<_, Owner>("SELECT * FROM owners WHERE ownerid = $1 FOR UPDATE")
        .bind(ownerid)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn set_delinquent(
    conn: &mut PgConnection,
    ownerid: i32,
    delinquent: bool,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE owners SET delinquent = $2, updatestamp = NOW() WHERE ownerid = $1")
        .bind(ownerid)
        .bind(delinquent)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Flags every owner matching the pair as delinquent. Returns the number of rows touched.
pub async fn mark_delinquent(
    conn: &mut PgConnection,
    customer_id: &str,
    subscription_id: Option<&str>,
) -> sqlx::Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE owners SET delinquent = TRUE, updatestamp = NOW()
        WHERE stripe_customer_id = $1
          AND stripe_subscription_id IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(customer_id)
    .bind(subscription_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn link_stripe_ids(
    conn: &mut PgConnection,
    ownerid: i32,
    customer_id: &str,
    subscription_id: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE owners
        SET stripe_customer_id = $2, stripe_subscription_id = $3, updatestamp = NOW()
        WHERE ownerid = $1
        "#,
    )
    .bind(ownerid)
    .bind(customer_id)
    .bind(subscription_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn link_customer(
    conn: &mut PgConnection,
    ownerid: i32,
    customer_id: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE owners SET stripe_customer_id = $2, updatestamp = NOW() WHERE ownerid = $1")
        .bind(ownerid)
        .bind(customer_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Deactivates every repository of the owner in one statement.
pub async fn deactivate_repositories(conn: &mut PgConnection, ownerid: i32) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "UPDATE repos SET active = FALSE, activated = FALSE, updatestamp = NOW() WHERE ownerid = $1",
    )
    .bind(ownerid)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

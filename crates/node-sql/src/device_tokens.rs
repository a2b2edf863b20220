use chrono::{DateTime, Utc};
use models::{Address, DevicePlatform, DeviceToken};

#[derive(Debug, sqlx::FromRow)]
pub struct DeviceTokenRow {
    pub token_id: String,
    pub address: String,
    pub platform: String,
    pub token: String,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub is_active: bool,
}

impl TryFrom<DeviceTokenRow> for DeviceToken {
    type Error = sqlx::Error;

    fn try_from(row: DeviceTokenRow) -> Result<Self, Self::Error> {
        let platform: DevicePlatform = row.platform.parse().map_err(crate::decode_err)?;
        Ok(DeviceToken {
            token_id: row.token_id,
            address: Address::from(row.address),
            platform,
            token: row.token,
            device_name: row.device_name,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            is_active: row.is_active,
        })
    }
}

pub async fn fetch_for_address(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
) -> sqlx::Result<Vec<DeviceToken>> {
    let rows = sqlx::query_as::<_, DeviceTokenRow>(
        r#"
        SELECT token_id, address, platform, token, device_name, created_at, last_used_at,
               is_active
        FROM device_tokens
        WHERE address = $1 AND is_active
        "#,
    )
    .bind(address.as_str())
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(DeviceToken::try_from).collect()
}

/// Current owner of a physical push token, if any. Used to detect a
/// shared device moving between accounts.
pub async fn owner_of_token(
    executor: impl sqlx::PgExecutor<'_>,
    token: &str,
) -> sqlx::Result<Option<(String, Address)>> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT token_id, address FROM device_tokens WHERE token = $1 AND is_active
        "#,
    )
    .bind(token)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|(token_id, address)| (token_id, Address::from(address))))
}

pub async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    token: &DeviceToken,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO device_tokens (token_id, address, platform, token, device_name,
                                   created_at, last_used_at, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (token_id) DO UPDATE
            SET address = EXCLUDED.address,
                platform = EXCLUDED.platform,
                token = EXCLUDED.token,
                device_name = EXCLUDED.device_name,
                last_used_at = EXCLUDED.last_used_at,
                is_active = EXCLUDED.is_active
        "#,
    )
    .bind(&token.token_id)
    .bind(token.address.as_str())
    .bind(token.platform.to_string())
    .bind(&token.token)
    .bind(&token.device_name)
    .bind(token.created_at)
    .bind(token.last_used_at)
    .bind(token.is_active)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn remove(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
    token_id: &str,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM device_tokens WHERE address = $1 AND token_id = $2
        "#,
    )
    .bind(address.as_str())
    .bind(token_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Marks tokens unused since the cutoff as inactive, one returned
/// address per deactivated token so callers can drop the affected
/// users' cached hashes.
pub async fn deactivate_stale(
    executor: impl sqlx::PgExecutor<'_>,
    unused_since: DateTime<Utc>,
) -> sqlx::Result<Vec<Address>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        UPDATE device_tokens SET is_active = FALSE
        WHERE is_active AND last_used_at < $1
        RETURNING address
        "#,
    )
    .bind(unused_since)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(address,)| Address::from(address)).collect())
}

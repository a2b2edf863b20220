use models::{Address, Profile};

#[derive(Debug, sqlx::FromRow)]
pub struct ProfileRow {
    pub address: String,
    pub alias: String,
    pub short_alias: String,
    pub public_encryption_key: Option<String>,
    pub is_public: bool,
    pub block_index: i64,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            address: Address::from(row.address),
            alias: row.alias,
            short_alias: row.short_alias,
            public_encryption_key: row.public_encryption_key,
            is_public: row.is_public,
            block_index: row.block_index as u64,
        }
    }
}

pub async fn fetch_one(
    executor: impl sqlx::PgExecutor<'_>,
    address: &Address,
) -> sqlx::Result<Option<Profile>> {
    let row = sqlx::query_as::<_, ProfileRow>(
        r#"
        SELECT address, alias, short_alias, public_encryption_key, is_public, block_index
        FROM profiles
        WHERE address = $1
        "#,
    )
    .bind(address.as_str())
    .fetch_optional(executor)
    .await?;
    Ok(row.map(Profile::from))
}

pub async fn fetch_many(
    executor: impl sqlx::PgExecutor<'_>,
    addresses: &[Address],
) -> sqlx::Result<Vec<Profile>> {
    let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    let rows = sqlx::query_as::<_, ProfileRow>(
        r#"
        SELECT address, alias, short_alias, public_encryption_key, is_public, block_index
        FROM profiles
        WHERE address = ANY($1)
        "#,
    )
    .bind(&addresses)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(Profile::from).collect())
}

/// Aliases for the given addresses; addresses with no profile are
/// simply absent from the result.
pub async fn fetch_display_names(
    executor: impl sqlx::PgExecutor<'_>,
    addresses: &[Address],
) -> sqlx::Result<Vec<(Address, String)>> {
    let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT address, alias FROM profiles WHERE address = ANY($1)
        "#,
    )
    .bind(&addresses)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(address, alias)| (Address::from(address), alias))
        .collect())
}

use crate::error::ApiError;
use crate::store::SyncStore;
use models::Address;
use projections::IdentityCache;
use std::collections::HashMap;

/// Resolves display names through the global hash in one HMGET, then
/// back-fills misses from the database and writes them into the hash.
/// Addresses with no profile at all stay absent from the result.
pub async fn resolve_display_names(
    store: &dyn SyncStore,
    identity: &IdentityCache,
    addresses: &[Address],
) -> Result<HashMap<Address, String>, ApiError> {
    let mut resolved = HashMap::with_capacity(addresses.len());
    let mut missing: Vec<Address> = Vec::new();

    match identity.display_names(addresses).await {
        Some(cached) => {
            for (address, name) in cached {
                match name {
                    Some(name) => {
                        resolved.insert(address, name);
                    }
                    None => missing.push(address),
                }
            }
        }
        // Cache unavailable: resolve everything from the database.
        None => missing = addresses.to_vec(),
    }

    if !missing.is_empty() {
        let from_db = store.display_names(&missing).await.map_err(ApiError::db)?;
        identity.set_display_names(&from_db).await;
        resolved.extend(from_db);
    }
    Ok(resolved)
}

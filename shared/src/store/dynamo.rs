use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use log::{debug, error, info};

use super::{DeliveryLog, InvitationStore};
use crate::error::{InviteError, InviteResult, StoreError};
use crate::models::{DeliveryAttempt, Invitation};

pub const DEFAULT_INVITATIONS_TABLE: &str = "parent-invitations";
pub const DEFAULT_DELIVERIES_TABLE: &str = "invitation-deliveries";

pub const ID_INDEX: &str = "id-index";
pub const PARENT_INDEX: &str = "parent_id-index";
pub const INVITATION_INDEX: &str = "invitation_id-index";

type Item = HashMap<String, AttributeValue>;

async fn default_client() -> Client {
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;
    Client::new(&config)
}

fn db_error(context: &str, e: impl std::fmt::Display) -> StoreError {
    error!("DynamoDB {} failed: {}", context, e);
    StoreError::Database(format!("{}: {}", context, e))
}

/// Runs a query on a secondary index, following pagination.
async fn query_index(
    client: &Client,
    table: &str,
    index: &str,
    key: &str,
    value: &str,
) -> Result<Vec<Item>, StoreError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;
    loop {
        let output = client
            .query()
            .table_name(table)
            .index_name(index)
            .key_condition_expression("#k = :v")
            .expression_attribute_names("#k", key)
            .expression_attribute_values(":v", AttributeValue::S(value.to_string()))
            .set_exclusive_start_key(start_key.take())
            .send()
            .await
            .map_err(|e| db_error("query", e))?;

        if let Some(page) = output.items {
            items.extend(page);
        }
        match output.last_evaluated_key {
            Some(key) if !key.is_empty() => start_key = Some(key),
            _ => break,
        }
    }
    Ok(items)
}

/// Scans a whole table, following pagination.
async fn scan_table(client: &Client, table: &str) -> Result<Vec<Item>, StoreError> {
    let mut items = Vec::new();
    let mut start_key: Option<Item> = None;
    loop {
        let output = client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(start_key.take())
            .send()
            .await
            .map_err(|e| db_error("scan", e))?;

        if let Some(page) = output.items {
            items.extend(page);
        }
        match output.last_evaluated_key {
            Some(key) if !key.is_empty() => start_key = Some(key),
            _ => break,
        }
    }
    Ok(items)
}

/// Invitations table, partitioned by `token`.
pub struct DynamoInvitationStore {
    client: Client,
    table_name: String,
}

impl DynamoInvitationStore {
    pub async fn new() -> Self {
        let table_name = env::var("INVITATIONS_TABLE")
            .unwrap_or_else(|_| DEFAULT_INVITATIONS_TABLE.to_string());
        info!("Using DynamoDB invitations table '{}'", table_name);
        Self::with_client_and_table(default_client().await, table_name)
    }

    pub fn with_client_and_table(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Invitation>, StoreError> {
        let items = query_index(&self.client, &self.table_name, ID_INDEX, "id", id).await?;
        match items.into_iter().next() {
            Some(item) => Ok(Some(serde_dynamo::from_item(item)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl InvitationStore for DynamoInvitationStore {
    async fn insert_invitation(&self, invitation: Invitation) -> Result<Invitation, StoreError> {
        if self.find_by_id(&invitation.id).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "invitation id {} already exists",
                invitation.id
            )));
        }

        let item: Item = serde_dynamo::to_item(&invitation)?;
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(#t)")
            .expression_attribute_names("#t", "token")
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Stored invitation id={}", invitation.id);
                Ok(invitation)
            }
            Err(e) => {
                let conflict = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if conflict {
                    Err(StoreError::Conflict("invitation token already in use".into()))
                } else {
                    Err(db_error("put_item", e))
                }
            }
        }
    }

    async fn accept(&self, token: &str) -> InviteResult<Invitation> {
        let existing = match self.get_invitation_by_token(token).await {
            Ok(inv) => inv,
            Err(StoreError::NotFound(_)) => return Err(InviteError::InvalidToken),
            Err(e) => return Err(e.into()),
        };
        if existing.is_accepted {
            return Err(InviteError::AlreadyAccepted(existing.id));
        }

        let accepted_at = Utc::now();
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("token", AttributeValue::S(token.to_string()))
            .update_expression("SET is_accepted = :yes, accepted_at = :at")
            .condition_expression("attribute_exists(#t) AND is_accepted = :no")
            .expression_attribute_names("#t", "token")
            .expression_attribute_values(":yes", AttributeValue::Bool(true))
            .expression_attribute_values(":no", AttributeValue::Bool(false))
            .expression_attribute_values(":at", AttributeValue::S(accepted_at.to_rfc3339()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(Invitation {
                is_accepted: true,
                accepted_at: Some(accepted_at),
                ..existing
            }),
            Err(e) => {
                let lost_race = e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false);
                if lost_race {
                    Err(InviteError::AlreadyAccepted(existing.id))
                } else {
                    Err(db_error("update_item", e).into())
                }
            }
        }
    }

    async fn get_invitation(&self, id: &str) -> Result<Invitation, StoreError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("invitation {}", id)))
    }

    async fn get_invitation_by_token(&self, token: &str) -> Result<Invitation, StoreError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("token", AttributeValue::S(token.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| db_error("get_item", e))?;

        match output.item {
            Some(item) => Ok(serde_dynamo::from_item(item)?),
            None => Err(StoreError::NotFound("invitation for token".into())),
        }
    }

    async fn get_invitations_by_parent(
        &self,
        parent_id: &str,
    ) -> Result<Vec<Invitation>, StoreError> {
        let items = query_index(
            &self.client,
            &self.table_name,
            PARENT_INDEX,
            "parent_id",
            parent_id,
        )
        .await?;
        let mut invitations: Vec<Invitation> = serde_dynamo::from_items(items)?;
        invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(invitations)
    }

    async fn list_invitations(&self) -> Result<Vec<Invitation>, StoreError> {
        let items = scan_table(&self.client, &self.table_name).await?;
        let mut invitations: Vec<Invitation> = serde_dynamo::from_items(items)?;
        invitations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(invitations)
    }

    async fn delete_invitations(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for id in ids {
            let Some(inv) = self.find_by_id(id).await? else {
                continue;
            };
            self.client
                .delete_item()
                .table_name(&self.table_name)
                .key("token", AttributeValue::S(inv.token))
                .send()
                .await
                .map_err(|e| db_error("delete_item", e))?;
            removed += 1;
        }
        info!("Deleted {} invitations from '{}'", removed, self.table_name);
        Ok(removed)
    }
}

/// Delivery attempts table, partitioned by attempt `id`.
pub struct DynamoDeliveryLog {
    client: Client,
    table_name: String,
}

impl DynamoDeliveryLog {
    pub async fn new() -> Self {
        let table_name = env::var("DELIVERIES_TABLE")
            .unwrap_or_else(|_| DEFAULT_DELIVERIES_TABLE.to_string());
        info!("Using DynamoDB deliveries table '{}'", table_name);
        Self::with_client_and_table(default_client().await, table_name)
    }

    pub fn with_client_and_table(client: Client, table_name: String) -> Self {
        Self { client, table_name }
    }
}

#[async_trait]
impl DeliveryLog for DynamoDeliveryLog {
    async fn record(&self, attempt: DeliveryAttempt) -> Result<DeliveryAttempt, StoreError> {
        let item: Item = serde_dynamo::to_item(&attempt)?;
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| db_error("put_item", e))?;
        Ok(attempt)
    }

    async fn attempts_for(&self, invitation_id: &str) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let items = query_index(
            &self.client,
            &self.table_name,
            INVITATION_INDEX,
            "invitation_id",
            invitation_id,
        )
        .await?;
        let mut attempts: Vec<DeliveryAttempt> = serde_dynamo::from_items(items)?;
        attempts.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(attempts)
    }

    async fn attempts_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        // Stored timestamps carry variable fractional digits, so the window is
        // applied after decoding rather than as a string filter expression.
        let items = scan_table(&self.client, &self.table_name).await?;
        let attempts: Vec<DeliveryAttempt> = serde_dynamo::from_items(items)?;
        Ok(attempts
            .into_iter()
            .filter(|a| since.map_or(true, |s| a.sent_at >= s))
            .collect())
    }

    async fn delete_for_invitations(&self, invitation_ids: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for invitation_id in invitation_ids {
            for attempt in self.attempts_for(invitation_id).await? {
                self.client
                    .delete_item()
                    .table_name(&self.table_name)
                    .key("id", AttributeValue::S(attempt.id))
                    .send()
                    .await
                    .map_err(|e| db_error("delete_item", e))?;
                removed += 1;
            }
        }
        info!(
            "Deleted {} delivery attempts from '{}'",
            removed, self.table_name
        );
        Ok(removed)
    }
}

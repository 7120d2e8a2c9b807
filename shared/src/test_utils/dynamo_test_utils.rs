use std::env;

use aws_sdk_dynamodb::config::{Credentials, Region};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ScalarAttributeType,
};
use aws_sdk_dynamodb::Client;
use log::debug;

use crate::store::dynamo::{ID_INDEX, INVITATION_INDEX, PARENT_INDEX};

/// DynamoDB-backed tests only run when `USE_DYNAMODB=true`.
pub fn use_dynamodb() -> bool {
    env::var("USE_DYNAMODB")
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Client for a local DynamoDB (`DYNAMODB_ENDPOINT`, default `http://localhost:8000`).
pub async fn create_dynamo_client() -> Client {
    let endpoint =
        env::var("DYNAMODB_ENDPOINT").unwrap_or_else(|_| "http://localhost:8000".to_string());
    debug!("Connecting to local DynamoDB at {}", endpoint);
    let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .endpoint_url(endpoint)
        .credentials_provider(Credentials::new("local", "local", None, None, "test"))
        .load()
        .await;
    Client::new(&config)
}

fn string_attr(name: &str) -> Result<AttributeDefinition, String> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(|e| e.to_string())
}

fn hash_key(name: &str) -> Result<KeySchemaElement, String> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(KeyType::Hash)
        .build()
        .map_err(|e| e.to_string())
}

fn index_on(index: &str, attribute: &str) -> Result<GlobalSecondaryIndex, String> {
    GlobalSecondaryIndex::builder()
        .index_name(index)
        .key_schema(hash_key(attribute)?)
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::All)
                .build(),
        )
        .build()
        .map_err(|e| e.to_string())
}

pub async fn create_invitation_table(client: &Client, table_name: &str) -> Result<(), String> {
    client
        .create_table()
        .table_name(table_name)
        .attribute_definitions(string_attr("token")?)
        .attribute_definitions(string_attr("id")?)
        .attribute_definitions(string_attr("parent_id")?)
        .key_schema(hash_key("token")?)
        .global_secondary_indexes(index_on(ID_INDEX, "id")?)
        .global_secondary_indexes(index_on(PARENT_INDEX, "parent_id")?)
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

pub async fn create_delivery_table(client: &Client, table_name: &str) -> Result<(), String> {
    client
        .create_table()
        .table_name(table_name)
        .attribute_definitions(string_attr("id")?)
        .attribute_definitions(string_attr("invitation_id")?)
        .key_schema(hash_key("id")?)
        .global_secondary_indexes(index_on(INVITATION_INDEX, "invitation_id")?)
        .billing_mode(BillingMode::PayPerRequest)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Deletes every item in `table_name`, whose partition key is `key_attr`.
pub async fn clear_dynamo_table(
    client: &Client,
    table_name: &str,
    key_attr: &str,
) -> Result<(), String> {
    let output = client
        .scan()
        .table_name(table_name)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    for item in output.items.unwrap_or_default() {
        let Some(key) = item.get(key_attr).cloned() else {
            continue;
        };
        client
            .delete_item()
            .table_name(table_name)
            .key(key_attr, key)
            .send()
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

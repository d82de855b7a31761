use async_trait::async_trait;
use elasticsearch::{
    BulkOperation, BulkParts, Elasticsearch as EsClient,
    auth::Credentials,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::ConfigError;
use crate::log_entry::LogEntry;
use crate::sink::{Sink, SinkError};
use crate::tag::Tag;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticSearchConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    /// Fixed index for every batch. When unset the index is derived from the
    /// tag, e.g. `Mongo.Orders` goes to `mongo-orders`.
    #[serde(default)]
    pub index_name: Option<String>,
}

pub struct ElasticSearchSink {
    config: ElasticSearchConfig,
    client: EsClient,
}

impl ElasticSearchSink {
    pub fn from_config(config: ElasticSearchConfig) -> Result<Self, ConfigError> {
        let url = config
            .url
            .parse()
            .map_err(|e| ConfigError::Sink(format!("invalid elasticsearch url '{}': {e}", config.url)))?;
        let credentials = Credentials::Basic(config.user.clone(), config.password.clone());
        let conn_pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(conn_pool)
            .auth(credentials)
            .build()
            .map_err(|e| ConfigError::Sink(format!("failed to create elasticsearch transport: {e}")))?;
        let client = EsClient::new(transport);

        Ok(Self { config, client })
    }

    pub fn index_for(&self, tag: &Tag) -> String {
        index_name(self.config.index_name.as_deref(), tag)
    }
}

fn index_name(fixed: Option<&str>, tag: &Tag) -> String {
    match fixed {
        Some(name) => name.to_string(),
        None => tag.key().replace('.', "-"),
    }
}

#[async_trait]
impl Sink for ElasticSearchSink {
    async fn write(&self, tag: &Tag, batch: &[LogEntry]) -> Result<(), SinkError> {
        let index = self.index_for(tag);
        let docs = batch
            .iter()
            .map(|entry| BulkOperation::index(entry.to_json()).into())
            .collect::<Vec<BulkOperation<JsonValue>>>();

        let response = self
            .client
            .bulk(BulkParts::Index(&index))
            .body(docs)
            .send()
            .await?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(format!("bulk request to '{index}' returned {status}").into());
        }
        debug!("Indexed {} entries into {}", batch.len(), index);
        Ok(())
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_name_from_tag() {
        let tag = Tag::parse("Mongo.Orders").unwrap();
        assert_eq!(index_name(None, &tag), "mongo-orders");
        assert_eq!(index_name(Some("logs"), &tag), "logs");
    }

    #[test]
    fn test_invalid_url_is_a_config_error() {
        let result = ElasticSearchSink::from_config(ElasticSearchConfig {
            url: "not a url".into(),
            user: "elastic".into(),
            password: "changeme".into(),
            index_name: None,
        });
        assert!(matches!(result, Err(ConfigError::Sink(_))));
    }
}

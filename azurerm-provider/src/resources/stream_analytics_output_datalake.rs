//! azurerm_stream_analytics_output_datalake
//!
//! A Stream Analytics job output writing to Azure Data Lake Store. The
//! `refresh_token` is write-only: the API never returns it, so reads carry it
//! over from the previous state.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};

use azurerm_core::error::{ErrorContext, ProviderError, ProviderResult};
use azurerm_core::id::{ChildIdFormat, ChildKey};
use azurerm_core::poll::{ProvisioningState, WaitConfig};
use azurerm_core::provider::ResourceType;
use azurerm_core::resource::{Attributes, Resource, ResourceAddress, State, Value};
use azurerm_core::schema::{AttributeSchema, AttributeType, ResourceSchema, validators};

use super::{Env, ResourceHandler, ensure_not_exists, identifier_from, parse_child_id, required_str};
use crate::client::{complete, complete_delete, get_as};
use crate::models::{
    AvroProperties, CsvProperties, DataLakeStoreProperties, Encoding, JsonOutputFormat,
    JsonProperties, Output, OutputDataSource, OutputProperties, Serialization,
};

pub const RESOURCE_TYPE: &str = "azurerm_stream_analytics_output_datalake";
const API_VERSION: &str = "2016-03-01";

pub const ID_FORMAT: ChildIdFormat =
    ChildIdFormat::new("Microsoft.StreamAnalytics", "streamingjobs", "outputs");

const FIELD_DELIMITERS: [&str; 5] = [" ", ",", "\t", "|", ";"];

/// Data source properties that map 1:1 onto string attributes
const DATASOURCE_ATTRIBUTES: [&str; 7] = [
    "account_name",
    "tenant_id",
    "token_user_principal_name",
    "token_user_display_name",
    "file_path_prefix",
    "date_format",
    "time_format",
];

pub struct StreamAnalyticsOutputDataLake;

fn serialization_schema() -> ResourceSchema {
    ResourceSchema::new("serialization")
        .attribute(
            AttributeSchema::new(
                "type",
                AttributeType::Enum(vec![
                    "Avro".to_string(),
                    "Csv".to_string(),
                    "Json".to_string(),
                ]),
            )
            .required(),
        )
        .attribute(AttributeSchema::new(
            "field_delimiter",
            AttributeType::Enum(FIELD_DELIMITERS.iter().map(|d| d.to_string()).collect()),
        ))
        .attribute(AttributeSchema::new(
            "encoding",
            AttributeType::Enum(vec!["UTF8".to_string()]),
        ))
        .attribute(AttributeSchema::new(
            "format",
            AttributeType::Enum(vec!["Array".to_string(), "LineSeparated".to_string()]),
        ))
}

impl ResourceType for StreamAnalyticsOutputDataLake {
    fn name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        let required_string =
            |name: &str| AttributeSchema::new(name, validators::non_empty_string()).required();
        let path_name = |name: &str| {
            AttributeSchema::new(name, validators::path_segment())
                .required()
                .force_new()
        };

        let mut schema = ResourceSchema::new(RESOURCE_TYPE)
            .with_description("Stream Analytics output to Azure Data Lake Store")
            .attribute(path_name("name"))
            .attribute(path_name("stream_analytics_job_name"))
            .attribute(
                AttributeSchema::new("resource_group_name", validators::resource_group())
                    .required()
                    .force_new(),
            )
            .attribute(required_string("refresh_token").sensitive())
            .attribute(
                AttributeSchema::new(
                    "serialization",
                    AttributeType::Block(Box::new(serialization_schema())),
                )
                .required(),
            );
        for name in DATASOURCE_ATTRIBUTES {
            schema = schema.attribute(required_string(name));
        }
        schema
    }
}

fn error_context(key: &ChildKey) -> ErrorContext {
    ErrorContext::new(
        "Stream Analytics Output Data Lake",
        &key.child_name,
        format!(
            "Job {:?} / Resource Group {:?}",
            key.parent_name, key.resource_group
        ),
    )
}

fn operation_wait(timeout: Duration) -> WaitConfig {
    WaitConfig::new(
        vec![ProvisioningState::Accepted],
        vec![ProvisioningState::Succeeded],
    )
    .timeout(timeout)
}

/// Build the typed serialization from the `serialization` block
pub fn expand_serialization(block: &HashMap<String, Value>) -> ProviderResult<Serialization> {
    let field = |name: &str| block.get_str(name).filter(|s| !s.is_empty());
    let encoding = || match field("encoding") {
        Some(e) if e.eq_ignore_ascii_case("UTF8") => Ok(Encoding::Utf8),
        Some(e) => Err(ProviderError::validation(format!(
            "unsupported serialization encoding {:?}",
            e
        ))),
        None => Err(ProviderError::validation(
            "`encoding` must be specified for this serialization type",
        )),
    };

    let kind = field("type")
        .ok_or_else(|| ProviderError::validation("serialization `type` is required"))?;
    if !kind.eq_ignore_ascii_case("Json") && field("format").is_some() {
        return Err(ProviderError::validation(
            "`format` can only be set when `type` is Json",
        ));
    }

    match kind.to_ascii_lowercase().as_str() {
        "avro" => {
            if field("encoding").is_some() || field("field_delimiter").is_some() {
                return Err(ProviderError::validation(
                    "`encoding` and `field_delimiter` cannot be set when `type` is Avro",
                ));
            }
            Ok(Serialization::Avro {
                properties: AvroProperties {},
            })
        }
        "csv" => {
            let field_delimiter = field("field_delimiter").ok_or_else(|| {
                ProviderError::validation("`field_delimiter` must be set when `type` is Csv")
            })?;
            Ok(Serialization::Csv {
                properties: CsvProperties {
                    field_delimiter: field_delimiter.to_string(),
                    encoding: encoding()?,
                },
            })
        }
        "json" => {
            if field("field_delimiter").is_some() {
                return Err(ProviderError::validation(
                    "`field_delimiter` cannot be set when `type` is Json",
                ));
            }
            let format = match field("format") {
                None => None,
                Some(f) if f.eq_ignore_ascii_case("Array") => Some(JsonOutputFormat::Array),
                Some(f) if f.eq_ignore_ascii_case("LineSeparated") => {
                    Some(JsonOutputFormat::LineSeparated)
                }
                Some(f) => {
                    return Err(ProviderError::validation(format!(
                        "unsupported JSON format {:?}",
                        f
                    )));
                }
            };
            Ok(Serialization::Json {
                properties: JsonProperties {
                    encoding: encoding()?,
                    format,
                },
            })
        }
        other => Err(ProviderError::validation(format!(
            "unsupported serialization type {:?}",
            other
        ))),
    }
}

/// Project a serialization back onto the `serialization` block
pub fn flatten_serialization(serialization: &Serialization) -> Value {
    let mut block = HashMap::new();
    match serialization {
        Serialization::Avro { .. } => {
            block.insert("type".to_string(), Value::from("Avro"));
        }
        Serialization::Csv { properties } => {
            block.insert("type".to_string(), Value::from("Csv"));
            block.insert(
                "field_delimiter".to_string(),
                Value::from(properties.field_delimiter.as_str()),
            );
            block.insert("encoding".to_string(), encoding_value(properties.encoding));
        }
        Serialization::Json { properties } => {
            block.insert("type".to_string(), Value::from("Json"));
            block.insert("encoding".to_string(), encoding_value(properties.encoding));
            if let Some(format) = properties.format {
                let format = match format {
                    JsonOutputFormat::Array => "Array",
                    JsonOutputFormat::LineSeparated => "LineSeparated",
                };
                block.insert("format".to_string(), Value::from(format));
            }
        }
    }
    Value::Map(block)
}

fn encoding_value(encoding: Encoding) -> Value {
    match encoding {
        Encoding::Utf8 => Value::from("UTF8"),
    }
}

fn output_body(resource: &Resource) -> ProviderResult<serde_json::Value> {
    let attr = |name: &str| required_str(resource, name).map(|s| Some(s.to_string()));
    let serialization = resource
        .get_block("serialization")
        .ok_or_else(|| ProviderError::validation("`serialization` block is required"))
        .and_then(expand_serialization)
        .map_err(|e| e.while_doing("expanding `serialization`"))?;

    let output = Output {
        name: Some(required_str(resource, "name")?.to_string()),
        properties: Some(OutputProperties {
            datasource: Some(OutputDataSource::DataLakeStore {
                properties: DataLakeStoreProperties {
                    account_name: attr("account_name")?,
                    tenant_id: attr("tenant_id")?,
                    token_user_principal_name: attr("token_user_principal_name")?,
                    token_user_display_name: attr("token_user_display_name")?,
                    refresh_token: attr("refresh_token")?,
                    file_path_prefix: attr("file_path_prefix")?,
                    date_format: attr("date_format")?,
                    time_format: attr("time_format")?,
                },
            }),
            serialization: Some(serialization),
        }),
        ..Default::default()
    };
    serde_json::to_value(&output)
        .map_err(|e| ProviderError::internal("failed to encode request").with_cause(e))
}

impl StreamAnalyticsOutputDataLake {
    async fn read_output(
        &self,
        env: &Env<'_>,
        address: &ResourceAddress,
        identifier: &str,
        refresh_token: Option<&str>,
    ) -> ProviderResult<State> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;
        let context = error_context(&key);

        let output = get_as::<Output>(env.client, &path, API_VERSION)
            .await
            .map_err(|e| e.while_doing("retrieving").with_context(&context))?;
        let Some(output) = output else {
            debug!(
                "Output Data Lake {:?} was not found in Stream Analytics Job {:?} / Resource Group {:?} - removing from state",
                key.child_name, key.parent_name, key.resource_group
            );
            return Ok(State::not_found(address.clone()));
        };

        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::from(key.child_name.as_str()));
        attributes.insert(
            "stream_analytics_job_name".to_string(),
            Value::from(key.parent_name.as_str()),
        );
        attributes.insert(
            "resource_group_name".to_string(),
            Value::from(key.resource_group.as_str()),
        );

        if let Some(props) = output.properties {
            match props.datasource {
                Some(OutputDataSource::DataLakeStore { properties: source }) => {
                    let values = [
                        source.account_name,
                        source.tenant_id,
                        source.token_user_principal_name,
                        source.token_user_display_name,
                        source.file_path_prefix,
                        source.date_format,
                        source.time_format,
                    ];
                    for (name, value) in DATASOURCE_ATTRIBUTES.iter().zip(values) {
                        if let Some(value) = value {
                            attributes.insert(name.to_string(), Value::from(value));
                        }
                    }
                    if let Some(token) = refresh_token.map(str::to_string).or(source.refresh_token) {
                        attributes.insert("refresh_token".to_string(), Value::from(token));
                    }
                }
                Some(other) => {
                    return Err(ProviderError::remote(format!(
                        "output data source is {:?}, not a Data Lake output",
                        other.type_name()
                    ))
                    .with_context(&context));
                }
                None => {}
            }
            if let Some(serialization) = props.serialization {
                attributes.insert(
                    "serialization".to_string(),
                    flatten_serialization(&serialization),
                );
            }
        }

        Ok(State::existing(address.clone(), attributes).with_identifier(identifier))
    }
}

#[async_trait]
impl ResourceHandler for StreamAnalyticsOutputDataLake {
    async fn read(
        &self,
        env: &Env<'_>,
        address: &ResourceAddress,
        identifier: &str,
        previous: Option<&State>,
    ) -> ProviderResult<State> {
        let refresh_token = previous.and_then(|p| p.get_str("refresh_token"));
        self.read_output(env, address, identifier, refresh_token)
            .await
    }

    async fn create(&self, env: &Env<'_>, resource: &Resource) -> ProviderResult<State> {
        let key = ChildKey::new(
            required_str(resource, "resource_group_name")?,
            required_str(resource, "stream_analytics_job_name")?,
            required_str(resource, "name")?,
        );
        let path = ID_FORMAT.format(env.subscription_id(), &key);
        info!("Preparing arguments for Stream Analytics Data Lake Output creation");

        let identifier = async {
            ensure_not_exists(env, RESOURCE_TYPE, &path, API_VERSION).await?;
            let body = output_body(resource)?;
            let submission = env
                .client
                .put(&path, API_VERSION, body)
                .await
                .map_err(|e| e.while_doing("creating"))?;
            complete(
                env.client,
                submission,
                &operation_wait(env.config.timeouts.create()),
                env.cancel(),
            )
            .await?;

            let read = env
                .client
                .get(&path, API_VERSION)
                .await
                .map_err(|e| e.while_doing("retrieving"))?;
            identifier_from(read.as_ref(), "Stream Analytics Output Data Lake")
        }
        .await
        .map_err(|e| e.with_context(&error_context(&key)))?;

        self.read_output(
            env,
            &resource.address,
            &identifier,
            resource.get_str("refresh_token"),
        )
        .await
    }

    async fn update(
        &self,
        env: &Env<'_>,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;

        async {
            let body = output_body(to)?;
            let submission = env
                .client
                .patch(&path, API_VERSION, body)
                .await
                .map_err(|e| e.while_doing("updating"))?;
            complete(
                env.client,
                submission,
                &operation_wait(env.config.timeouts.update()),
                env.cancel(),
            )
            .await
        }
        .await
        .map_err(|e| e.with_context(&error_context(&key)))?;

        self.read_output(env, &to.address, identifier, to.get_str("refresh_token"))
            .await
    }

    async fn delete(
        &self,
        env: &Env<'_>,
        _address: &ResourceAddress,
        identifier: &str,
    ) -> ProviderResult<()> {
        let (key, path) = parse_child_id(&ID_FORMAT, identifier)?;

        async {
            let outcome = env
                .client
                .delete(&path, API_VERSION)
                .await
                .map_err(|e| e.while_doing("deleting"))?;
            complete_delete(
                env.client,
                outcome,
                &operation_wait(env.config.timeouts.delete()),
                env.cancel(),
            )
            .await
        }
        .await
        .map_err(|e| e.with_context(&error_context(&key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeControlPlane;
    use crate::resources::tests::{SUBSCRIPTION, test_config, test_ctx};
    use azurerm_core::error::ErrorKind;
    use azurerm_core::lock::LockRegistry;
    use serde_json::json;

    fn csv_block() -> Value {
        let mut block = HashMap::new();
        block.insert("type".to_string(), Value::from("Csv"));
        block.insert("field_delimiter".to_string(), Value::from(","));
        block.insert("encoding".to_string(), Value::from("UTF8"));
        Value::Map(block)
    }

    fn desired() -> Resource {
        Resource::new(RESOURCE_TYPE, "lake")
            .with_attribute("name", "lake-output")
            .with_attribute("stream_analytics_job_name", "job")
            .with_attribute("resource_group_name", "rg")
            .with_attribute("account_name", "lakeaccount")
            .with_attribute("tenant_id", "tenant")
            .with_attribute("token_user_principal_name", "bob@example.com")
            .with_attribute("token_user_display_name", "Bob")
            .with_attribute("refresh_token", "dummy-token")
            .with_attribute("file_path_prefix", "/logs/{date}/{time}")
            .with_attribute("date_format", "yyyy/MM/dd")
            .with_attribute("time_format", "HH")
            .with_attribute("serialization", csv_block())
    }

    fn output_path() -> String {
        ID_FORMAT.format(SUBSCRIPTION, &ChildKey::new("rg", "job", "lake-output"))
    }

    fn block(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn desired_configuration_passes_schema() {
        let schema = StreamAnalyticsOutputDataLake.schema();
        assert!(schema.validate(&desired().attributes).is_ok());
        assert_eq!(schema.sensitive_attributes(), vec!["refresh_token".to_string()]);
    }

    #[test]
    fn serialization_rules() {
        assert!(matches!(
            expand_serialization(&block(&[("type", "Avro")])).unwrap(),
            Serialization::Avro { .. }
        ));
        assert!(expand_serialization(&block(&[("type", "Avro"), ("encoding", "UTF8")])).is_err());
        assert!(expand_serialization(&block(&[("type", "Csv"), ("encoding", "UTF8")])).is_err());
        assert!(expand_serialization(&block(&[("type", "Json")])).is_err());
        assert!(expand_serialization(&block(&[("type", "Csv"), ("format", "Array")])).is_err());

        let json = expand_serialization(&block(&[
            ("type", "Json"),
            ("encoding", "UTF8"),
            ("format", "LineSeparated"),
        ]))
        .unwrap();
        assert_eq!(
            flatten_serialization(&json),
            Value::Map(block(&[
                ("type", "Json"),
                ("encoding", "UTF8"),
                ("format", "LineSeparated"),
            ]))
        );
    }

    #[tokio::test]
    async fn create_sends_data_lake_datasource() {
        let client = FakeControlPlane::new();
        let config = test_config();
        let locks = LockRegistry::new();
        let ctx = test_ctx(&locks);
        let env = Env {
            client: &client,
            config: &config,
            ctx: &ctx,
        };

        let state = StreamAnalyticsOutputDataLake
            .create(&env, &desired())
            .await
            .unwrap();

        let stored = client.object(&output_path()).unwrap();
        let datasource = &stored["properties"]["datasource"];
        assert_eq!(datasource["type"], "Microsoft.DataLake/Accounts");
        assert_eq!(datasource["properties"]["timeFormat"], "HH");
        assert_eq!(stored["properties"]["serialization"]["type"], "Csv");

        assert_eq!(state.identifier.as_deref(), Some(output_path().as_str()));
        assert_eq!(state.attributes, desired().attributes);
    }

    #[tokio::test]
    async fn read_carries_refresh_token_from_previous_state() {
        let client = FakeControlPlane::new();
        client.insert(
            &output_path(),
            json!({
                "properties": {
                    "datasource": {
                        "type": "Microsoft.DataLake/Accounts",
                        "properties": { "accountName": "lakeaccount" }
                    },
                    "serialization": { "type": "Avro" }
                }
            }),
        );
        let config = test_config();
        let locks = LockRegistry::new();
        let ctx = test_ctx(&locks);
        let env = Env {
            client: &client,
            config: &config,
            ctx: &ctx,
        };
        let address = desired().address;

        let fresh = StreamAnalyticsOutputDataLake
            .read(&env, &address, &output_path(), None)
            .await
            .unwrap();
        assert_eq!(fresh.get_str("refresh_token"), None);
        assert_eq!(fresh.get_str("account_name"), Some("lakeaccount"));

        let previous = State::existing(address.clone(), desired().attributes);
        let state = StreamAnalyticsOutputDataLake
            .read(&env, &address, &output_path(), Some(&previous))
            .await
            .unwrap();
        assert_eq!(state.get_str("refresh_token"), Some("dummy-token"));
        assert_eq!(
            state.get_block("serialization").and_then(|b| b.get_str("type")),
            Some("Avro")
        );
    }

    #[tokio::test]
    async fn read_rejects_other_datasource_variants() {
        let cases = [
            ("Microsoft.Storage/Blob", "Microsoft.Storage/Blob"),
            ("Microsoft.Sql/Server/Database", "unknown"),
        ];
        for (source_type, reported) in cases {
            let client = FakeControlPlane::new();
            client.insert(
                &output_path(),
                json!({
                    "properties": {
                        "datasource": { "type": source_type, "properties": {} }
                    }
                }),
            );
            let config = test_config();
            let locks = LockRegistry::new();
            let ctx = test_ctx(&locks);
            let env = Env {
                client: &client,
                config: &config,
                ctx: &ctx,
            };

            let err = StreamAnalyticsOutputDataLake
                .read(&env, &desired().address, &output_path(), None)
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::Remote);
            assert!(err.message.contains("not a Data Lake output"), "{}", err.message);
            assert!(err.message.contains(reported));
        }
    }

    #[tokio::test]
    async fn update_patches_existing_output() {
        let client = FakeControlPlane::new();
        let config = test_config();
        let locks = LockRegistry::new();
        let ctx = test_ctx(&locks);
        let env = Env {
            client: &client,
            config: &config,
            ctx: &ctx,
        };
        let created = StreamAnalyticsOutputDataLake
            .create(&env, &desired())
            .await
            .unwrap();

        let changed = desired().with_attribute("file_path_prefix", "/archive/{date}");
        let state = StreamAnalyticsOutputDataLake
            .update(&env, &output_path(), &created, &changed)
            .await
            .unwrap();

        assert!(client.calls().contains(&format!("PATCH {}", output_path())));
        assert_eq!(state.get_str("file_path_prefix"), Some("/archive/{date}"));
    }

    #[tokio::test]
    async fn delete_twice_succeeds() {
        let client = FakeControlPlane::new();
        client.insert(&output_path(), json!({}));
        let config = test_config();
        let locks = LockRegistry::new();
        let ctx = test_ctx(&locks);
        let env = Env {
            client: &client,
            config: &config,
            ctx: &ctx,
        };
        let address = desired().address;

        for _ in 0..2 {
            StreamAnalyticsOutputDataLake
                .delete(&env, &address, &output_path())
                .await
                .unwrap();
        }
        assert!(client.object(&output_path()).is_none());
    }
}

// Copyright 2025 Oxide Computer Company
//! OpenAPI documents for commandable services
//!
//! Each command becomes a `POST /<base_route>/<command>` operation whose
//! request body is the JSON object described by the command's schema.

use crate::commands::Command;
use crate::config::ConfigSwagger;
use crate::error::ApplicationError;
use crate::http_util::CONTENT_TYPE_JSON;
use crate::schema::ObjectSchema;
use crate::schema::PropertySchema;
use crate::schema::TypeCode;
use crate::service::append_base_route;

use indexmap::IndexMap;
use std::sync::Arc;

const OPENAPI_VERSION: &str = "3.0.2";
const DEFAULT_TITLE: &str = "CommandableHttpService";
const DEFAULT_DESCRIPTION: &str = "Commandable microservice";
const DEFAULT_VERSION: &str = "1";

/**
 * Builds the OpenAPI document of a commandable service.
 */
pub struct CommandableOpenApiDocument<'a> {
    base_route: &'a str,
    info: openapiv3::Info,
    commands: &'a [Arc<Command>],
}

impl<'a> CommandableOpenApiDocument<'a> {
    pub fn new(
        base_route: &'a str,
        swagger: &ConfigSwagger,
        commands: &'a [Arc<Command>],
    ) -> Self {
        let info = openapiv3::Info {
            title: swagger.name.clone().unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: Some(
                swagger
                    .description
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            ),
            version: swagger
                .version
                .clone()
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            ..Default::default()
        };
        CommandableOpenApiDocument { base_route, info, commands }
    }

    /// Produces the document.
    pub fn openapi(&self) -> openapiv3::OpenAPI {
        let tag = self.base_route.trim_matches('/').to_string();
        let mut paths = IndexMap::new();
        for command in self.commands {
            let mut operation = openapiv3::Operation::default();
            operation.operation_id = Some(command.name().to_string());
            operation.tags = vec![tag.clone()];
            operation.request_body = Some(openapiv3::ReferenceOr::Item(
                request_body(command.schema()),
            ));
            operation.responses.responses.insert(
                openapiv3::StatusCode::Code(200),
                openapiv3::ReferenceOr::Item(openapiv3::Response {
                    description: "Successful response".to_string(),
                    content: json_content(object_schema(None)),
                    ..Default::default()
                }),
            );

            let path = append_base_route(
                self.base_route,
                &command.name().to_ascii_lowercase(),
            );
            let path_item =
                openapiv3::PathItem { post: Some(operation), ..Default::default() };
            paths.insert(path, openapiv3::ReferenceOr::Item(path_item));
        }

        openapiv3::OpenAPI {
            openapi: OPENAPI_VERSION.to_string(),
            info: self.info.clone(),
            paths: openapiv3::Paths { paths, ..Default::default() },
            ..Default::default()
        }
    }

    /// Produces the document as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ApplicationError> {
        serde_json::to_string_pretty(&self.openapi()).map_err(|e| {
            ApplicationError::internal(
                "SERIALIZATION_ERROR",
                "failed to serialize OpenAPI document",
            )
            .with_cause(e)
        })
    }
}

fn request_body(schema: Option<&ObjectSchema>) -> openapiv3::RequestBody {
    openapiv3::RequestBody {
        content: json_content(object_schema(schema)),
        required: false,
        ..Default::default()
    }
}

fn json_content(
    schema: openapiv3::Schema,
) -> IndexMap<String, openapiv3::MediaType> {
    let mut content = IndexMap::new();
    content.insert(
        CONTENT_TYPE_JSON.to_string(),
        openapiv3::MediaType {
            schema: Some(openapiv3::ReferenceOr::Item(schema)),
            ..Default::default()
        },
    );
    content
}

fn schema_of(kind: openapiv3::SchemaKind) -> openapiv3::Schema {
    openapiv3::Schema {
        schema_data: openapiv3::SchemaData::default(),
        schema_kind: kind,
    }
}

fn object_schema(schema: Option<&ObjectSchema>) -> openapiv3::Schema {
    let mut object = openapiv3::ObjectType::default();
    for property in schema.map(ObjectSchema::properties).unwrap_or_default() {
        object.properties.insert(
            property.name.clone(),
            openapiv3::ReferenceOr::boxed_item(property_schema(property)),
        );
        if property.required {
            object.required.push(property.name.clone());
        }
    }
    schema_of(openapiv3::SchemaKind::Type(openapiv3::Type::Object(object)))
}

fn property_schema(property: &PropertySchema) -> openapiv3::Schema {
    match (&property.value_type, &property.object, &property.items) {
        (TypeCode::Object, Some(nested), _) => object_schema(Some(nested)),
        (TypeCode::Array, _, items) => {
            let items = items.as_ref().map(|t| {
                openapiv3::ReferenceOr::boxed_item(type_schema(t))
            });
            schema_of(openapiv3::SchemaKind::Type(openapiv3::Type::Array(
                openapiv3::ArrayType {
                    items,
                    min_items: None,
                    max_items: None,
                    unique_items: false,
                },
            )))
        }
        (value_type, _, _) => type_schema(value_type),
    }
}

fn type_schema(value_type: &TypeCode) -> openapiv3::Schema {
    let kind = match value_type.openapi_type() {
        "integer" => openapiv3::Type::Integer(openapiv3::IntegerType::default()),
        "number" => openapiv3::Type::Number(openapiv3::NumberType::default()),
        "string" => openapiv3::Type::String(openapiv3::StringType::default()),
        "boolean" => openapiv3::Type::Boolean(openapiv3::BooleanType {
            enumeration: Vec::new(),
        }),
        "array" => openapiv3::Type::Array(openapiv3::ArrayType {
            items: None,
            min_items: None,
            max_items: None,
            unique_items: false,
        }),
        _ => openapiv3::Type::Object(openapiv3::ObjectType::default()),
    };
    schema_of(openapiv3::SchemaKind::Type(kind))
}

// Copyright 2025 Oxide Computer Company
//! Named commands and command sets
//!
//! A [`Command`] is an async operation addressed by name that takes a
//! correlation id and a [`Parameters`] bag.  Controllers group their commands
//! in a [`CommandSet`] and expose it through [`Commandable`], which is all a
//! commandable service or a direct client needs to serve or call them.

use crate::error::ApplicationError;
use crate::parameters::Parameters;
use crate::schema::ObjectSchema;
use crate::schema::ValidationResult;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a command.  `None` means "no result" and is served as 204.
pub type CommandResult = Result<Option<Value>, ApplicationError>;

type CommandFn =
    dyn Fn(Option<String>, Parameters) -> BoxFuture<'static, CommandResult>
        + Send
        + Sync;

/// Converts a typed command outcome into a [`CommandResult`].
pub fn command_result<T: Serialize>(
    result: Result<Option<T>, ApplicationError>,
) -> CommandResult {
    match result? {
        None => Ok(None),
        Some(value) => serde_json::to_value(value).map(Some).map_err(|e| {
            ApplicationError::internal(
                "SERIALIZATION_ERROR",
                "failed to serialize command result",
            )
            .with_cause(e)
        }),
    }
}

pub struct Command {
    name: String,
    schema: Option<ObjectSchema>,
    function: Arc<CommandFn>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Command {
    /// Creates a command.  With a `schema`, arguments are validated before
    /// `function` runs.
    pub fn new<F, Fut>(name: &str, schema: Option<ObjectSchema>, function: F) -> Self
    where
        F: Fn(Option<String>, Parameters) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        let function: Arc<CommandFn> =
            Arc::new(move |correlation_id, args| function(correlation_id, args).boxed());
        Command { name: name.to_string(), schema, function }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&ObjectSchema> {
        self.schema.as_ref()
    }

    pub fn validate(&self, args: &Parameters) -> Vec<ValidationResult> {
        match &self.schema {
            Some(schema) => schema.validate(&Value::Object(args.as_map().clone())),
            None => Vec::new(),
        }
    }

    pub async fn execute(
        &self,
        correlation_id: Option<&str>,
        args: Parameters,
    ) -> CommandResult {
        if let Some(schema) = &self.schema {
            schema.validate_and_return_error(
                correlation_id,
                &Value::Object(args.as_map().clone()),
            )?;
        }
        (self.function)(correlation_id.map(str::to_string), args)
            .await
            .map_err(|e| e.with_correlation_id(correlation_id))
    }
}

/// Commands of one controller, in registration order, with unique names.
#[derive(Debug, Default)]
pub struct CommandSet {
    commands: Vec<Arc<Command>>,
    index: BTreeMap<String, usize>,
}

impl CommandSet {
    pub fn new() -> Self {
        CommandSet::default()
    }

    /// Adds `command`.  A name that is already taken, ignoring ASCII case, is
    /// refused, since both commands would map to the same route.
    pub fn add_command(&mut self, command: Command) -> Result<(), ApplicationError> {
        self.add_shared(Arc::new(command))
    }

    pub fn add_commands<I>(&mut self, commands: I) -> Result<(), ApplicationError>
    where
        I: IntoIterator<Item = Command>,
    {
        commands.into_iter().try_for_each(|c| self.add_command(c))
    }

    /// Adds every command of `other`.
    pub fn add_command_set(&mut self, other: &CommandSet) -> Result<(), ApplicationError> {
        other.commands.iter().try_for_each(|c| self.add_shared(Arc::clone(c)))
    }

    fn add_shared(&mut self, command: Arc<Command>) -> Result<(), ApplicationError> {
        let name = command.name();
        if self.index.keys().any(|taken| taken.eq_ignore_ascii_case(name)) {
            return Err(ApplicationError::config(
                "DUPLICATE_COMMAND",
                format!("command \"{}\" is already defined", name),
            )
            .with_details("command", name));
        }
        self.index.insert(command.name().to_string(), self.commands.len());
        self.commands.push(command);
        Ok(())
    }

    pub fn commands(&self) -> &[Arc<Command>] {
        &self.commands
    }

    pub fn find_command(&self, name: &str) -> Option<&Arc<Command>> {
        self.index.get(name).map(|i| &self.commands[*i])
    }

    fn not_found(correlation_id: Option<&str>, name: &str) -> ApplicationError {
        ApplicationError::bad_request(
            "CMD_NOT_FOUND",
            format!("requested command does not exist: {}", name),
        )
        .with_correlation_id(correlation_id)
        .with_details("command", name)
    }

    /// Validates `args` for command `name`.
    pub fn validate(
        &self,
        name: &str,
        args: &Parameters,
    ) -> Result<Vec<ValidationResult>, ApplicationError> {
        self.find_command(name)
            .map(|c| c.validate(args))
            .ok_or_else(|| CommandSet::not_found(None, name))
    }

    pub async fn execute(
        &self,
        correlation_id: Option<&str>,
        name: &str,
        args: Parameters,
    ) -> CommandResult {
        let command = self
            .find_command(name)
            .ok_or_else(|| CommandSet::not_found(correlation_id, name))?;
        command.execute(correlation_id, args).await
    }
}

/// Something that serves named commands.
pub trait Commandable: Send + Sync {
    fn command_set(&self) -> Arc<CommandSet>;
}

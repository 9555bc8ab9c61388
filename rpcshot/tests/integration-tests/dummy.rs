// Copyright 2025 Oxide Computer Company

//! A small in-memory "dummy" resource served both as plain REST routes and as
//! commands, shared by the service and client tests.

use rpcshot::command_result;
use rpcshot::send_created_result;
use rpcshot::send_deleted_result;
use rpcshot::send_result;
use rpcshot::ApplicationError;
use rpcshot::Command;
use rpcshot::CommandSet;
use rpcshot::Commandable;
use rpcshot::DataPage;
use rpcshot::FilterParams;
use rpcshot::HandlerResult;
use rpcshot::ObjectSchema;
use rpcshot::PagingParams;
use rpcshot::Parameters;
use rpcshot::RequestContext;
use rpcshot::RestServiceRegistrar;
use rpcshot::ServiceRoutes;
use rpcshot::TypeCode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;

const MAX_TAKE: i64 = 100;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Dummy {
    #[serde(default)]
    pub id: String,
    pub key: String,
    pub content: String,
}

impl Dummy {
    pub fn new(id: &str, key: &str, content: &str) -> Self {
        Dummy {
            id: id.to_string(),
            key: key.to_string(),
            content: content.to_string(),
        }
    }
}

pub fn dummy_schema() -> ObjectSchema {
    ObjectSchema::new()
        .with_optional_property("id", TypeCode::String)
        .with_required_property("key", TypeCode::String)
        .with_required_property("content", TypeCode::String)
}

#[derive(Debug, Default)]
pub struct DummyStore {
    items: Mutex<Vec<Dummy>>,
}

impl DummyStore {
    pub fn get_page_by_filter(
        &self,
        filter: &FilterParams,
        paging: &PagingParams,
    ) -> DataPage<Dummy> {
        let items = self.items.lock().unwrap();
        let matching: Vec<&Dummy> = items
            .iter()
            .filter(|d| filter.get("key").map_or(true, |key| d.key == key))
            .collect();
        let total = paging.total.then(|| matching.len() as i64);
        let data = matching
            .into_iter()
            .skip(paging.skip_or(0) as usize)
            .take(paging.take_or(MAX_TAKE) as usize)
            .cloned()
            .collect();
        DataPage::new(data, total)
    }

    pub fn get_one_by_id(&self, id: &str) -> Option<Dummy> {
        self.items.lock().unwrap().iter().find(|d| d.id == id).cloned()
    }

    pub fn create(&self, mut dummy: Dummy) -> Dummy {
        if dummy.id.is_empty() {
            dummy.id = uuid::Uuid::new_v4().to_string();
        }
        self.items.lock().unwrap().push(dummy.clone());
        dummy
    }

    pub fn update(&self, dummy: Dummy) -> Option<Dummy> {
        let mut items = self.items.lock().unwrap();
        let item = items.iter_mut().find(|d| d.id == dummy.id)?;
        *item = dummy.clone();
        Some(dummy)
    }

    pub fn delete_by_id(&self, id: &str) -> Option<Dummy> {
        let mut items = self.items.lock().unwrap();
        let index = items.iter().position(|d| d.id == id)?;
        Some(items.remove(index))
    }
}

fn raised_error() -> ApplicationError {
    ApplicationError::not_found("NOT_FOUND_TEST", "Dummy error in controller!")
}

/*
 * Commandable controller
 */

pub struct DummyController {
    store: Arc<DummyStore>,
    commands: Arc<CommandSet>,
}

impl DummyController {
    pub fn new() -> Arc<Self> {
        let store = Arc::new(DummyStore::default());
        let commands = dummy_commands(&store).unwrap();
        Arc::new(DummyController { store, commands: Arc::new(commands) })
    }

    pub fn store(&self) -> &DummyStore {
        &self.store
    }
}

impl Commandable for DummyController {
    fn command_set(&self) -> Arc<CommandSet> {
        Arc::clone(&self.commands)
    }
}

fn dummy_commands(store: &Arc<DummyStore>) -> Result<CommandSet, ApplicationError> {
    let mut commands = CommandSet::new();

    let s = Arc::clone(store);
    commands.add_command(Command::new(
        "get_dummies",
        Some(
            ObjectSchema::new()
                .with_optional_property("filter", TypeCode::Map)
                .with_optional_property("paging", TypeCode::Map),
        ),
        move |_, args: Parameters| {
            let page = args
                .get_as::<FilterParams>("filter")
                .and_then(|filter| {
                    let paging = args.get_as::<PagingParams>("paging")?;
                    Ok(s.get_page_by_filter(
                        &filter.unwrap_or_default(),
                        &paging.unwrap_or_default(),
                    ))
                })
                .map(Some);
            async move { command_result(page) }
        },
    ))?;

    let s = Arc::clone(store);
    commands.add_command(Command::new(
        "get_dummy_by_id",
        Some(ObjectSchema::new().with_required_property("dummy_id", TypeCode::String)),
        move |_, args: Parameters| {
            let dummy = s.get_one_by_id(&args.get_as_string("dummy_id"));
            async move { command_result(Ok(dummy)) }
        },
    ))?;

    let s = Arc::clone(store);
    commands.add_command(Command::new(
        "create_dummy",
        Some(ObjectSchema::new().with_required_object("dummy", dummy_schema())),
        move |_, args: Parameters| {
            let dummy = args
                .get_as::<Dummy>("dummy")
                .map(|dummy| dummy.map(|dummy| s.create(dummy)));
            async move { command_result(dummy) }
        },
    ))?;

    let s = Arc::clone(store);
    commands.add_command(Command::new(
        "update_dummy",
        Some(ObjectSchema::new().with_required_object("dummy", dummy_schema())),
        move |_, args: Parameters| {
            let dummy = args
                .get_as::<Dummy>("dummy")
                .map(|dummy| dummy.and_then(|dummy| s.update(dummy)));
            async move { command_result(dummy) }
        },
    ))?;

    let s = Arc::clone(store);
    commands.add_command(Command::new(
        "delete_dummy",
        Some(ObjectSchema::new().with_required_property("dummy_id", TypeCode::String)),
        move |_, args: Parameters| {
            let dummy = s.delete_by_id(&args.get_as_string("dummy_id"));
            async move { command_result(Ok(dummy)) }
        },
    ))?;

    commands.add_command(Command::new(
        "raise_exception",
        None,
        |_, _: Parameters| async { command_result::<Dummy>(Err(raised_error())) },
    ))?;

    commands.add_command(Command::new(
        "check_correlation_id",
        None,
        |correlation_id: Option<String>, _: Parameters| async move {
            command_result(Ok(Some(json!({ "correlation_id": correlation_id }))))
        },
    ))?;

    Ok(commands)
}

/*
 * Plain REST routes
 */

pub struct DummyRoutes {
    pub store: Arc<DummyStore>,
}

impl DummyRoutes {
    pub fn new() -> Arc<Self> {
        Arc::new(DummyRoutes { store: Arc::new(DummyStore::default()) })
    }
}

async fn panicking_handler(_rqctx: RequestContext) -> HandlerResult {
    panic!("test panic message");
}

impl RestServiceRegistrar for DummyRoutes {
    fn register(&self, routes: &ServiceRoutes<'_>) -> Result<(), ApplicationError> {
        let store = Arc::clone(&self.store);
        routes.register_route("get", "/dummies", None, move |rqctx: RequestContext| {
            let page = store
                .get_page_by_filter(&rqctx.filter_params(), &rqctx.paging_params());
            async move { send_result(Ok(Some(page))) }
        })?;

        routes.register_route(
            "get",
            "/dummies/check/correlation_id",
            None,
            |rqctx: RequestContext| {
                let body = json!({ "correlation_id": rqctx.correlation_id() });
                async move { send_result(Ok(Some(body))) }
            },
        )?;

        let store = Arc::clone(&self.store);
        routes.register_route(
            "get",
            "/dummies/{dummy_id}",
            None,
            move |rqctx: RequestContext| {
                let dummy = store.get_one_by_id(rqctx.param("dummy_id").unwrap_or_default());
                async move { send_result(Ok::<_, ApplicationError>(dummy)) }
            },
        )?;

        let store = Arc::clone(&self.store);
        routes.register_route(
            "post",
            "/dummies",
            Some(ObjectSchema::new().with_required_object("body", dummy_schema())),
            move |rqctx: RequestContext| {
                let result = rqctx.body_json::<Dummy>().map(|d| Some(store.create(d)));
                async move { send_created_result(result) }
            },
        )?;

        let store = Arc::clone(&self.store);
        routes.register_route(
            "put",
            "/dummies",
            Some(ObjectSchema::new().with_required_object("body", dummy_schema())),
            move |rqctx: RequestContext| {
                let result = rqctx.body_json::<Dummy>().map(|d| store.update(d));
                async move { send_result(result) }
            },
        )?;

        let store = Arc::clone(&self.store);
        routes.register_route(
            "delete",
            "/dummies/{dummy_id}",
            None,
            move |rqctx: RequestContext| {
                let dummy = store.delete_by_id(rqctx.param("dummy_id").unwrap_or_default());
                async move { send_deleted_result(Ok::<_, ApplicationError>(dummy)) }
            },
        )?;

        routes.register_route(
            "post",
            "/raise_exception",
            None,
            |rqctx: RequestContext| {
                let error = raised_error().with_correlation_id(rqctx.correlation_id());
                async move { send_result(Err::<Option<Dummy>, _>(error)) }
            },
        )?;

        routes.register_route("get", "/panic", None, panicking_handler)
    }
}

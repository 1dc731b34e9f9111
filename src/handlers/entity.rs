//! Entity CRUD handlers: paginate, all, show, insert, update, patch, delete, force_delete.

use super::{HandlerFuture, RequestContext};
use crate::config::{EntityNode, Operation};
use crate::error::AppError;
use crate::extensions::HookStage;
use crate::query::QueryOptions;
use crate::response::{self, Pagination};
use crate::service::{CrudService, RequestValidator};
use crate::sql::{Scope, SelectSpec};
use serde_json::{Map, Value};

/// Columns to select: the requested fields plus the keys `with` relations join on.
/// The second list holds the keys that were added and must be pruned afterwards.
fn selected_columns(entity: &EntityNode, options: &QueryOptions) -> (Vec<String>, Vec<String>) {
    if options.fields.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let mut columns = options.fields.clone();
    let mut added = Vec::new();
    for with in &options.with {
        if let Some(relation) = entity.relation(&with.name) {
            let key = relation.our_key().to_string();
            if !columns.contains(&key) {
                columns.push(key.clone());
                added.push(key);
            }
        }
    }
    (columns, added)
}

fn prune(rows: &mut [Value], added: &[String]) {
    if added.is_empty() {
        return;
    }
    for row in rows.iter_mut() {
        if let Value::Object(map) = row {
            for key in added {
                map.remove(key);
            }
        }
    }
}

fn list_spec<'a>(entity: &'a EntityNode, options: &'a QueryOptions, scopes: Vec<Scope>) -> SelectSpec<'a> {
    let mut spec = SelectSpec::new(entity);
    spec.conditions = &options.conditions;
    spec.sort = &options.sort;
    spec.scopes = scopes;
    spec.with_trashed = options.trashed;
    spec
}

fn timestamp_columns(entity: &EntityNode, operation: Operation) -> Vec<&str> {
    let mut columns = Vec::new();
    if operation == Operation::Insert {
        columns.extend(entity.created_at_column.as_deref());
    }
    columns.extend(entity.updated_at_column.as_deref());
    columns
}

/// Rows back out of an after-hook result.
fn into_rows(result: Value) -> Vec<Value> {
    match result {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        row => vec![row],
    }
}

/// Body back out of a before-hook.
fn into_body(data: Value) -> Result<Map<String, Value>, AppError> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::Internal("before hook replaced the body with a non-object".into())),
    }
}

pub fn paginate(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let graph = &api.versions[route.version].graph;
        let entity = graph.node(route.entity);

        let options = QueryOptions::parse(&ctx.query)?;
        options.authorize(entity, graph)?;
        let scopes = ctx.parent_scope()?.into_iter().collect();
        let mut params = ctx.params_value();
        ctx.run_hooks(HookStage::Before, &mut params).await?;

        let spec = list_spec(entity, &options, scopes);
        let total = CrudService::count(&mut ctx.db, &spec).await?;

        let (columns, added) = selected_columns(entity, &options);
        let mut page = spec.clone();
        page.columns = columns;
        page.limit = Some(options.per_page);
        page.offset = Some(options.offset());
        let mut rows = CrudService::list(&mut ctx.db, &page).await?;
        CrudService::load_relations(&mut ctx.db, graph, entity, &mut rows, &options.with).await?;
        prune(&mut rows, &added);
        let mut result = Value::Array(rows);
        ctx.run_hooks(HookStage::After, &mut result).await?;
        let rows = into_rows(result);

        let pagination = Pagination::new(total, options.page, options.per_page, rows.len());
        let data = rows.into_iter().map(|row| ctx.present(row)).collect();
        Ok(response::paginated(data, pagination))
    })
}

pub fn all(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let graph = &api.versions[route.version].graph;
        let entity = graph.node(route.entity);

        let options = QueryOptions::parse(&ctx.query)?;
        options.authorize(entity, graph)?;
        let scopes = ctx.parent_scope()?.into_iter().collect();
        let mut params = ctx.params_value();
        ctx.run_hooks(HookStage::Before, &mut params).await?;

        let (columns, added) = selected_columns(entity, &options);
        let mut spec = list_spec(entity, &options, scopes);
        spec.columns = columns;
        let mut rows = CrudService::list(&mut ctx.db, &spec).await?;
        CrudService::load_relations(&mut ctx.db, graph, entity, &mut rows, &options.with).await?;
        prune(&mut rows, &added);
        let mut result = Value::Array(rows);
        ctx.run_hooks(HookStage::After, &mut result).await?;

        let data: Vec<Value> = into_rows(result).into_iter().map(|row| ctx.present(row)).collect();
        Ok(response::ok(data))
    })
}

pub fn show(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let graph = &api.versions[route.version].graph;
        let entity = graph.node(route.entity);

        let options = QueryOptions::parse(&ctx.query)?;
        options.authorize(entity, graph)?;
        let mut params = ctx.params_value();
        ctx.run_hooks(HookStage::Before, &mut params).await?;

        let (columns, added) = selected_columns(entity, &options);
        let mut spec = list_spec(entity, &options, ctx.item_scopes()?);
        spec.columns = columns;
        let row = CrudService::read(&mut ctx.db, &spec)
            .await?
            .ok_or_else(|| AppError::not_found(&entity.name))?;
        let mut rows = vec![row];
        CrudService::load_relations(&mut ctx.db, graph, entity, &mut rows, &options.with).await?;
        prune(&mut rows, &added);

        let mut row = rows.pop().unwrap_or(Value::Null);
        ctx.run_hooks(HookStage::After, &mut row).await?;
        Ok(response::ok(ctx.present(row)))
    })
}

pub fn insert(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let entity = api.versions[route.version].graph.node(route.entity);

        let mut body = ctx.body_object()?;
        let fillable = entity.fillable_for(Operation::Insert);
        body.retain(|key, _| fillable.contains(&key.as_str()));
        if let Some(parent) = ctx.parent_scope()? {
            body.insert(parent.column, parent.value);
        }
        if let Some(rules) = entity.validations_for(Operation::Insert) {
            RequestValidator::validate(&body, rules)?;
        }
        let mut data = Value::Object(body);
        ctx.run_hooks(HookStage::Before, &mut data).await?;
        let body = into_body(data)?;

        let now = timestamp_columns(entity, Operation::Insert);
        let mut row = CrudService::create(&mut ctx.db, entity, &body, &now).await?;
        tracing::debug!(entity = %entity.name, "inserted");
        ctx.run_hooks(HookStage::After, &mut row).await?;
        Ok(response::created(ctx.present(row)))
    })
}

pub fn update(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    save(ctx, Operation::Update)
}

pub fn patch(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    save(ctx, Operation::Patch)
}

fn save(ctx: &mut RequestContext, operation: Operation) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let entity = api.versions[route.version].graph.node(route.entity);

        let scopes = ctx.item_scopes()?;
        let existing = SelectSpec {
            scopes: scopes.clone(),
            ..SelectSpec::new(entity)
        };
        CrudService::read(&mut ctx.db, &existing)
            .await?
            .ok_or_else(|| AppError::not_found(&entity.name))?;

        let mut body = ctx.body_object()?;
        let fillable = entity.fillable_for(operation);
        body.retain(|key, _| fillable.contains(&key.as_str()));
        if let Some(parent) = &route.parent {
            body.remove(&parent.foreign_key);
        }
        if let Some(rules) = entity.validations_for(operation) {
            if operation == Operation::Patch {
                RequestValidator::validate_partial(&body, rules)?;
            } else {
                RequestValidator::validate(&body, rules)?;
            }
        }
        let mut data = Value::Object(body);
        ctx.run_hooks(HookStage::Before, &mut data).await?;
        let body = into_body(data)?;

        let now = timestamp_columns(entity, operation);
        let mut row = CrudService::update(&mut ctx.db, entity, &scopes, &body, &now)
            .await?
            .ok_or_else(|| AppError::not_found(&entity.name))?;
        ctx.run_hooks(HookStage::After, &mut row).await?;
        Ok(response::ok(ctx.present(row)))
    })
}

pub fn delete(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let entity = api.versions[route.version].graph.node(route.entity);

        let scopes = ctx.item_scopes()?;
        let mut params = ctx.params_value();
        ctx.run_hooks(HookStage::Before, &mut params).await?;
        let deleted = match &entity.deleted_at_column {
            Some(deleted_at) => CrudService::soft_delete(&mut ctx.db, entity, &scopes, deleted_at).await?,
            None => CrudService::delete(&mut ctx.db, entity, &scopes).await?,
        };
        let mut row = deleted.ok_or_else(|| AppError::not_found(&entity.name))?;
        ctx.run_hooks(HookStage::After, &mut row).await?;
        Ok(response::no_content())
    })
}

/// Hard delete, including rows already soft-deleted.
pub fn force_delete(ctx: &mut RequestContext) -> HandlerFuture<'_> {
    Box::pin(async move {
        let api = ctx.api.clone();
        let route = ctx.route.clone();
        let entity = api.versions[route.version].graph.node(route.entity);

        let scopes = ctx.item_scopes()?;
        let mut params = ctx.params_value();
        ctx.run_hooks(HookStage::Before, &mut params).await?;
        let mut row = CrudService::delete(&mut ctx.db, entity, &scopes)
            .await?
            .ok_or_else(|| AppError::not_found(&entity.name))?;
        ctx.run_hooks(HookStage::After, &mut row).await?;
        Ok(response::no_content())
    })
}

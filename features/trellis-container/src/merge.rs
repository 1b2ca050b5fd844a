use std::collections::HashSet;

use crate::{
    definition::{Definition, ResolvedDefinition},
    errors::DefinitionError,
    hooks::DefinitionSource,
};

/// Flatten a definition against its transitive parent chain.
///
/// Child scalar fields override when set and inherit when unset; property
/// assignments and constructor arguments are unioned by key with child
/// precedence. An unset merged scope defaults to singleton, and a definition
/// nested inside a non-singleton containing definition inherits the
/// containing scope regardless of its own declaration.
pub(crate) fn merge(
    source: &dyn DefinitionSource,
    name: &str,
    definition: &Definition,
    containing: Option<&ResolvedDefinition>,
) -> Result<ResolvedDefinition, DefinitionError> {
    let mut visited = HashSet::new();
    visited.insert(name.to_string());
    let flat = flatten(source, name, definition, &mut visited)?;

    let mut resolved = ResolvedDefinition::from_parts(name, flat);
    if let Some(containing) = containing {
        if !containing.scope.is_singleton() && resolved.scope.is_singleton() {
            resolved.scope = containing.scope.clone();
        }
    }
    Ok(resolved)
}

fn flatten(
    source: &dyn DefinitionSource,
    name: &str,
    definition: &Definition,
    visited: &mut HashSet<String>,
) -> Result<Definition, DefinitionError> {
    let Some(parent_name) = &definition.parent else {
        return Ok(definition.clone());
    };

    let parent_name = source.resolve_alias(parent_name);
    if parent_name == name || !visited.insert(parent_name.clone()) {
        return Err(DefinitionError::CircularParent {
            name: name.to_string(),
            parent: parent_name,
        });
    }

    let parent = source
        .lookup(&parent_name)
        .ok_or_else(|| DefinitionError::NotFound(parent_name.clone()))?;
    let base = flatten(source, &parent_name, &parent, visited)?;
    Ok(override_from(base, definition))
}

/// Apply the child's overrides onto the flattened parent
fn override_from(base: Definition, child: &Definition) -> Definition {
    let mut merged = base;
    merged.parent = None;

    if child.type_name.is_some() {
        merged.type_name = child.type_name.clone();
    }
    if child.scope.is_some() {
        merged.scope = child.scope.clone();
    }
    if child.lazy_init.is_some() {
        merged.lazy_init = child.lazy_init;
    }
    if child.init_callback.is_some() {
        merged.init_callback = child.init_callback.clone();
    }
    if child.destroy_callback.is_some() {
        merged.destroy_callback = child.destroy_callback.clone();
    }
    if child.factory.is_some() {
        merged.factory = child.factory.clone();
    }
    if !child.depends_on.is_empty() {
        merged.depends_on = child.depends_on.clone();
    }
    merged.is_abstract = child.is_abstract;
    merged.primary = child.primary;
    merged.candidate = child.candidate;

    for (index, value) in &child.constructor_args {
        merged.constructor_args.insert(*index, value.clone());
    }
    for assignment in &child.properties {
        match merged
            .properties
            .iter_mut()
            .find(|existing| existing.name == assignment.name)
        {
            Some(existing) => *existing = assignment.clone(),
            None => merged.properties.push(assignment.clone()),
        }
    }

    merged
}

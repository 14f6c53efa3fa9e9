//! Named object registry.
//!
//! Every core object (display resources, actions, triggers, probe handlers,
//! components and pipelines) lives under one globally unique name. The
//! registry owns the objects and the relations between them; the objects
//! themselves only hold what they need at runtime.
//!
//! Relations are tracked as back-references so deletion can refuse objects
//! that are still in use:
//!
//! | Object           | Referenced by                      |
//! |------------------|------------------------------------|
//! | display resource | actions, fonts/rectangles          |
//! | action           | triggers (shared)                  |
//! | trigger          | at most one probe handler          |
//! | probe handler    | at most one `(component, pad)`     |
//! | component        | at most one pipeline               |
//!
//! Relationship calls validate everything first and only then apply, so a
//! failed call leaves the registry untouched. Pipeline lifecycle calls run
//! after the registry lock is released, which lets listeners and actions
//! call back into the registry.

use crate::config::EngineConfig;
use crate::display::{DisplayKind, DisplayResource};
use crate::error::{OdeError, Result};
use crate::ode::{
    Action, ActionKind, BBoxFormat, ColorRef, OccurrenceInfo, ProbeHandler, Trigger,
    TriggerFilter, TriggerKind, TriggerLimit,
};
use crate::pipeline::{
    Component, ComponentKind, ListenerId, MediaEngine, Pad, Pipeline, PipelineState,
};
use crate::sink::{BrokerClient, MessageSinkAdapter, MessageSinkSettings};
use crate::types::{BoundingBox, RgbaColor};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The kinds of object sharing the registry namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    DisplayResource,
    Action,
    Trigger,
    ProbeHandler,
    Component,
    Pipeline,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::DisplayResource => "display resource",
            ObjectKind::Action => "action",
            ObjectKind::Trigger => "trigger",
            ObjectKind::ProbeHandler => "probe handler",
            ObjectKind::Component => "component",
            ObjectKind::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for [`Registry::create`].
pub enum ObjectSpec {
    DisplayResource(DisplayKind),
    Action(ActionKind),
    Trigger {
        kind: TriggerKind,
        filter: TriggerFilter,
        limit: TriggerLimit,
    },
    ProbeHandler,
    Component(ComponentKind),
    Pipeline {
        engine: Option<Box<dyn MediaEngine>>,
    },
}

enum Object {
    Display(Arc<DisplayResource>),
    Action(Arc<Action>),
    Trigger(Arc<Trigger>),
    Handler {
        handler: Arc<ProbeHandler>,
        attached: Option<(String, Pad)>,
    },
    Component(Arc<Component>),
    Pipeline(Arc<Pipeline>),
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Display(_) => ObjectKind::DisplayResource,
            Object::Action(_) => ObjectKind::Action,
            Object::Trigger(_) => ObjectKind::Trigger,
            Object::Handler { .. } => ObjectKind::ProbeHandler,
            Object::Component(_) => ObjectKind::Component,
            Object::Pipeline(_) => ObjectKind::Pipeline,
        }
    }
}

struct Entry {
    object: Object,
    /// Objects referencing this one.
    users: BTreeSet<String>,
    /// Display resources this object references.
    refs: Vec<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
}

impl Inner {
    fn entry(&self, name: &str) -> Result<&Entry> {
        self.entries.get(name).ok_or_else(|| OdeError::not_found(name))
    }

    fn wrong_kind(name: &str, actual: ObjectKind, expected: ObjectKind) -> OdeError {
        OdeError::InvalidParameter(format!("'{}' is a {}, not a {}", name, actual, expected))
    }

    fn display(&self, name: &str) -> Result<Arc<DisplayResource>> {
        match &self.entry(name)?.object {
            Object::Display(resource) => Ok(resource.clone()),
            other => Err(Self::wrong_kind(name, other.kind(), ObjectKind::DisplayResource)),
        }
    }

    fn color(&self, name: &str) -> Result<RgbaColor> {
        self.display(name)?.as_color().ok_or_else(|| {
            OdeError::InvalidParameter(format!("display resource '{}' is not a color", name))
        })
    }

    fn action(&self, name: &str) -> Result<Arc<Action>> {
        match &self.entry(name)?.object {
            Object::Action(action) => Ok(action.clone()),
            other => Err(Self::wrong_kind(name, other.kind(), ObjectKind::Action)),
        }
    }

    fn trigger(&self, name: &str) -> Result<Arc<Trigger>> {
        match &self.entry(name)?.object {
            Object::Trigger(trigger) => Ok(trigger.clone()),
            other => Err(Self::wrong_kind(name, other.kind(), ObjectKind::Trigger)),
        }
    }

    fn handler(&self, name: &str) -> Result<(Arc<ProbeHandler>, Option<(String, Pad)>)> {
        match &self.entry(name)?.object {
            Object::Handler { handler, attached } => Ok((handler.clone(), attached.clone())),
            other => Err(Self::wrong_kind(name, other.kind(), ObjectKind::ProbeHandler)),
        }
    }

    fn component(&self, name: &str) -> Result<Arc<Component>> {
        match &self.entry(name)?.object {
            Object::Component(component) => Ok(component.clone()),
            other => Err(Self::wrong_kind(name, other.kind(), ObjectKind::Component)),
        }
    }

    fn pipeline(&self, name: &str) -> Result<Arc<Pipeline>> {
        match &self.entry(name)?.object {
            Object::Pipeline(pipeline) => Ok(pipeline.clone()),
            other => Err(Self::wrong_kind(name, other.kind(), ObjectKind::Pipeline)),
        }
    }

    fn first_user(&self, name: &str) -> Option<String> {
        self.entries
            .get(name)
            .and_then(|e| e.users.iter().next().cloned())
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.entries.contains_key(name) {
            Err(OdeError::DuplicateName(name.to_string()))
        } else {
            Ok(())
        }
    }

    /// Insert a new object. `refs` must already be validated display names.
    fn insert(&mut self, name: &str, object: Object, refs: Vec<String>) -> Result<ObjectKind> {
        self.ensure_unique(name)?;
        for target in &refs {
            self.add_user(target, name);
        }
        let kind = object.kind();
        self.entries.insert(
            name.to_string(),
            Entry {
                object,
                users: BTreeSet::new(),
                refs,
            },
        );
        Ok(kind)
    }

    fn add_user(&mut self, target: &str, user: &str) {
        if let Some(entry) = self.entries.get_mut(target) {
            entry.users.insert(user.to_string());
        }
    }

    fn remove_user(&mut self, target: &str, user: &str) {
        match self.entries.get_mut(target) {
            Some(entry) => {
                if !entry.users.remove(user) {
                    tracing::warn!("'{}' was not referenced by '{}'", target, user);
                }
            }
            None => tracing::warn!(
                "'{}' references '{}', which no longer exists",
                user,
                target
            ),
        }
    }

    fn set_attached(&mut self, handler: &str, attachment: Option<(String, Pad)>) {
        match self.entries.get_mut(handler).map(|e| &mut e.object) {
            Some(Object::Handler { attached, .. }) => *attached = attachment,
            _ => tracing::warn!("Attached handler '{}' no longer exists", handler),
        }
    }

    /// Remove an entry and unwind its relations. Without `force`, objects
    /// still in use are refused and nothing changes.
    fn remove(&mut self, name: &str, force: bool) -> Result<Object> {
        let entry = self.entry(name)?;
        if !force {
            if let Some(user) = entry.users.iter().next() {
                return Err(OdeError::in_use(name, user.as_str()));
            }
            if let Object::Handler {
                attached: Some((component, _)),
                ..
            } = &entry.object
            {
                return Err(OdeError::in_use(name, component.as_str()));
            }
        }

        let Some(entry) = self.entries.remove(name) else {
            return Err(OdeError::not_found(name));
        };
        for target in &entry.refs {
            self.remove_user(target, name);
        }
        for user in &entry.users {
            tracing::warn!("Deleting '{}' while still referenced by '{}'", name, user);
        }

        match &entry.object {
            Object::Display(_) | Object::Action(_) => {}
            Object::Trigger(trigger) => {
                for action in trigger.remove_all_actions() {
                    self.remove_user(action.name(), name);
                }
                for user in &entry.users {
                    if let Ok((handler, _)) = self.handler(user) {
                        let _ = handler.remove_trigger(name);
                    }
                }
            }
            Object::Handler { handler, attached } => {
                for trigger in handler.remove_all_triggers() {
                    self.remove_user(trigger.name(), name);
                }
                if let Some((component, pad)) = attached {
                    match self.component(component) {
                        Ok(component) => {
                            component.detach(*pad, name);
                        }
                        Err(_) => tracing::warn!(
                            "Handler '{}' was attached to missing component '{}'",
                            name,
                            component
                        ),
                    }
                }
            }
            Object::Component(component) => {
                for pad in [Pad::Sink, Pad::Src] {
                    for handler in component.handlers(pad) {
                        component.detach(pad, handler.name());
                        self.set_attached(handler.name(), None);
                    }
                }
                for user in &entry.users {
                    if let Ok(pipeline) = self.pipeline(user) {
                        if let Err(e) = pipeline.remove_component(name) {
                            tracing::warn!("Could not unlink '{}' from '{}': {}", name, user, e);
                        }
                    }
                }
            }
            Object::Pipeline(pipeline) => {
                for component in pipeline.components() {
                    self.remove_user(component.name(), name);
                }
            }
        }
        Ok(entry.object)
    }

    fn names_of(&self, kind: ObjectKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.object.kind() == kind)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

/// Registry of every named object. Create one per application (or per test).
pub struct Registry {
    config: EngineConfig,
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("objects", &self.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registry whose pipelines and message sinks use `config`.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Generic contract ──

    /// Create an object under a new, unique name.
    pub fn create(&self, name: &str, spec: ObjectSpec) -> Result<ObjectKind> {
        let mut inner = self.inner();
        let result = self.create_locked(&mut inner, name, spec);
        match &result {
            Ok(kind) => tracing::info!("New {} '{}' created", kind, name),
            Err(e) => tracing::error!("Failed to create '{}': {}", name, e),
        }
        result
    }

    fn create_locked(&self, inner: &mut Inner, name: &str, spec: ObjectSpec) -> Result<ObjectKind> {
        inner.ensure_unique(name)?;
        match spec {
            ObjectSpec::DisplayResource(kind) => {
                let resource = DisplayResource::new(name, kind)?;
                inner.insert(name, Object::Display(Arc::new(resource)), Vec::new())
            }
            ObjectSpec::Action(kind) => {
                let action = Action::new(name, kind);
                let mut refs: Vec<String> =
                    action.display_refs().iter().map(|r| r.to_string()).collect();
                refs.sort();
                refs.dedup();
                for target in &refs {
                    inner.display(target)?;
                }
                inner.insert(name, Object::Action(Arc::new(action)), refs)
            }
            ObjectSpec::Trigger {
                kind,
                filter,
                limit,
            } => {
                let trigger = Trigger::new(name, kind, filter, limit)?;
                inner.insert(name, Object::Trigger(Arc::new(trigger)), Vec::new())
            }
            ObjectSpec::ProbeHandler => inner.insert(
                name,
                Object::Handler {
                    handler: Arc::new(ProbeHandler::new(name)),
                    attached: None,
                },
                Vec::new(),
            ),
            ObjectSpec::Component(kind) => {
                let component = Component::new(name, kind)?;
                inner.insert(name, Object::Component(Arc::new(component)), Vec::new())
            }
            ObjectSpec::Pipeline { engine } => {
                let settings = self.config.pipeline.clone();
                let pipeline = match engine {
                    Some(engine) => Pipeline::with_engine(name, settings, engine),
                    None => Pipeline::new(name, settings),
                };
                inner.insert(name, Object::Pipeline(Arc::new(pipeline)), Vec::new())
            }
        }
    }

    /// Delete one object. Fails with `InUse` while anything references it.
    ///
    /// A pipeline is stopped first; deleting a component detaches the
    /// handlers on its pads.
    pub fn delete(&self, name: &str) -> Result<()> {
        let result = self.delete_object(name);
        match &result {
            Ok(kind) => tracing::info!("{} '{}' deleted", kind, name),
            Err(e) => tracing::error!("Failed to delete '{}': {}", name, e),
        }
        result.map(|_| ())
    }

    fn delete_object(&self, name: &str) -> Result<ObjectKind> {
        let pipeline = self.inner().pipeline(name).ok();
        if let Some(pipeline) = pipeline {
            pipeline.stop()?;
        }
        let object = self.inner().remove(name, false)?;
        let kind = object.kind();
        // Pipelines and message sinks join threads when dropped.
        drop(object);
        Ok(kind)
    }

    /// Tear down every object, unwinding relations in dependency order.
    /// Broken relations are logged and skipped. No-op on an empty registry.
    pub fn delete_all(&self) -> Result<()> {
        let pipelines: Vec<Arc<Pipeline>> = {
            let inner = self.inner();
            inner
                .names_of(ObjectKind::Pipeline)
                .iter()
                .filter_map(|name| inner.pipeline(name).ok())
                .collect()
        };
        for pipeline in &pipelines {
            if let Err(e) = pipeline.stop() {
                tracing::warn!("Failed to stop pipeline '{}': {}", pipeline.name(), e);
            }
        }
        drop(pipelines);

        let order = [
            ObjectKind::Pipeline,
            ObjectKind::ProbeHandler,
            ObjectKind::Component,
            ObjectKind::Trigger,
            ObjectKind::Action,
            ObjectKind::DisplayResource,
        ];
        let mut removed = Vec::new();
        {
            let mut inner = self.inner();
            if inner.entries.is_empty() {
                return Ok(());
            }
            for kind in order {
                for name in inner.names_of(kind) {
                    match inner.remove(&name, true) {
                        Ok(object) => removed.push(object),
                        Err(e) => tracing::warn!("Skipping '{}' during delete-all: {}", name, e),
                    }
                }
            }
        }
        tracing::info!("Deleted all {} objects", removed.len());
        drop(removed);
        Ok(())
    }

    /// Kind of the named object.
    pub fn kind_of(&self, name: &str) -> Result<ObjectKind> {
        Ok(self.inner().entry(name)?.object.kind())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().entries.is_empty()
    }

    /// Every registered name, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner().entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of every object of `kind`, sorted.
    pub fn names_of(&self, kind: ObjectKind) -> Vec<String> {
        self.inner().names_of(kind)
    }

    /// Name of the first object referencing `name`, if any.
    pub fn user_of(&self, name: &str) -> Result<Option<String>> {
        let inner = self.inner();
        inner.entry(name)?;
        let user = inner.first_user(name).or_else(|| match inner.handler(name) {
            Ok((_, attached)) => attached.map(|(component, _)| component),
            Err(_) => None,
        });
        Ok(user)
    }

    pub fn display(&self, name: &str) -> Result<Arc<DisplayResource>> {
        self.inner().display(name)
    }

    pub fn action(&self, name: &str) -> Result<Arc<Action>> {
        self.inner().action(name)
    }

    pub fn trigger(&self, name: &str) -> Result<Arc<Trigger>> {
        self.inner().trigger(name)
    }

    pub fn handler(&self, name: &str) -> Result<Arc<ProbeHandler>> {
        self.inner().handler(name).map(|(handler, _)| handler)
    }

    pub fn component(&self, name: &str) -> Result<Arc<Component>> {
        self.inner().component(name)
    }

    pub fn pipeline(&self, name: &str) -> Result<Arc<Pipeline>> {
        self.inner().pipeline(name)
    }

    // ── Display resources ──

    pub fn display_color_new(&self, name: &str, red: f64, green: f64, blue: f64, alpha: f64) -> Result<()> {
        self.create(
            name,
            ObjectSpec::DisplayResource(DisplayKind::Color(RgbaColor::new(red, green, blue, alpha))),
        )
        .map(|_| ())
    }

    /// Font drawn in the color resource `color`.
    pub fn display_font_new(&self, name: &str, family: &str, size: u32, color: &str) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<ObjectKind> {
            inner.ensure_unique(name)?;
            let kind = DisplayKind::Font {
                family: family.to_string(),
                size,
                color: inner.color(color)?,
            };
            let resource = DisplayResource::new(name, kind)?;
            inner.insert(name, Object::Display(Arc::new(resource)), vec![color.to_string()])
        })();
        log_created(name, result)
    }

    /// Rectangle outlined in `color`, optionally filled with `bg_color`.
    pub fn display_rectangle_new(
        &self,
        name: &str,
        bbox: BoundingBox,
        border_width: u32,
        color: &str,
        bg_color: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<ObjectKind> {
            inner.ensure_unique(name)?;
            let mut refs = vec![color.to_string()];
            let kind = DisplayKind::Rectangle {
                bbox,
                border_width,
                color: inner.color(color)?,
                bg_color: match bg_color {
                    Some(bg) => {
                        let value = inner.color(bg)?;
                        if bg != color {
                            refs.push(bg.to_string());
                        }
                        Some(value)
                    }
                    None => None,
                },
            };
            let resource = DisplayResource::new(name, kind)?;
            inner.insert(name, Object::Display(Arc::new(resource)), refs)
        })();
        log_created(name, result)
    }

    // ── Actions ──

    /// Annotate action. Colors are looked up by name and must be color resources.
    pub fn action_format_bbox_new(
        &self,
        name: &str,
        border_width: u32,
        border_color: Option<&str>,
        bg_color: Option<&str>,
    ) -> Result<()> {
        let kind = {
            let inner = self.inner();
            let color_ref = |color: Option<&str>| -> Result<Option<ColorRef>> {
                match color {
                    Some(color) => {
                        inner.color(color)?;
                        Ok(Some(ColorRef::new(&inner.display(color)?)))
                    }
                    None => Ok(None),
                }
            };
            let format = color_ref(border_color).and_then(|border_color| {
                Ok(BBoxFormat {
                    border_width,
                    border_color,
                    bg_color: color_ref(bg_color)?,
                })
            });
            match format {
                Ok(format) => ActionKind::FormatBBox(format),
                Err(e) => {
                    tracing::error!("Failed to create '{}': {}", name, e);
                    return Err(e);
                }
            }
        };
        self.create(name, ObjectSpec::Action(kind)).map(|_| ())
    }

    /// Print action writing to stdout.
    pub fn action_print_new(&self, name: &str, force_flush: bool) -> Result<()> {
        self.create(name, ObjectSpec::Action(ActionKind::print(force_flush)))
            .map(|_| ())
    }

    pub fn action_message_meta_add_new(&self, name: &str, dedupe_by_object: bool) -> Result<()> {
        self.create(
            name,
            ObjectSpec::Action(ActionKind::AddMessageMeta { dedupe_by_object }),
        )
        .map(|_| ())
    }

    /// Action handing every occurrence to `callback` on the processing thread.
    pub fn action_monitor_new<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&OccurrenceInfo) + Send + Sync + 'static,
    {
        self.create(name, ObjectSpec::Action(ActionKind::Monitor(Arc::new(callback))))
            .map(|_| ())
    }

    pub fn action_log_new(&self, name: &str) -> Result<()> {
        self.create(name, ObjectSpec::Action(ActionKind::Log))
            .map(|_| ())
    }

    // ── Triggers ──

    pub fn trigger_new(
        &self,
        name: &str,
        kind: TriggerKind,
        filter: TriggerFilter,
        limit: TriggerLimit,
    ) -> Result<()> {
        self.create(
            name,
            ObjectSpec::Trigger {
                kind,
                filter,
                limit,
            },
        )
        .map(|_| ())
    }

    pub fn trigger_instance_new(&self, name: &str, filter: TriggerFilter, limit: TriggerLimit) -> Result<()> {
        self.trigger_new(name, TriggerKind::Instance, filter, limit)
    }

    pub fn trigger_occurrence_new(&self, name: &str, filter: TriggerFilter, limit: TriggerLimit) -> Result<()> {
        self.trigger_new(name, TriggerKind::Occurrence, filter, limit)
    }

    pub fn trigger_absence_new(&self, name: &str, filter: TriggerFilter, limit: TriggerLimit) -> Result<()> {
        self.trigger_new(name, TriggerKind::Absence, filter, limit)
    }

    pub fn trigger_count_new(
        &self,
        name: &str,
        filter: TriggerFilter,
        limit: TriggerLimit,
        minimum: u32,
        maximum: Option<u32>,
    ) -> Result<()> {
        self.trigger_new(name, TriggerKind::Count { minimum, maximum }, filter, limit)
    }

    pub fn trigger_interval_new(
        &self,
        name: &str,
        filter: TriggerFilter,
        limit: TriggerLimit,
        period: u64,
    ) -> Result<()> {
        self.trigger_new(name, TriggerKind::Interval { period }, filter, limit)
    }

    pub fn trigger_action_add(&self, trigger: &str, action: &str) -> Result<()> {
        self.trigger_action_add_many(trigger, &[action])
    }

    /// Append actions in order. Either all are added or none.
    pub fn trigger_action_add_many(&self, trigger: &str, actions: &[&str]) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            let target = inner.trigger(trigger)?;
            let mut resolved = Vec::with_capacity(actions.len());
            for (i, &name) in actions.iter().enumerate() {
                let action = inner.action(name)?;
                if target.has_action(name) || actions[..i].contains(&name) {
                    return Err(OdeError::DuplicateAction {
                        trigger: trigger.to_string(),
                        action: name.to_string(),
                    });
                }
                resolved.push(action);
            }
            for action in resolved {
                target.add_action(action.clone())?;
                inner.add_user(action.name(), trigger);
            }
            Ok(())
        })();
        match &result {
            Ok(()) => tracing::info!("Actions {:?} added to trigger '{}'", actions, trigger),
            Err(e) => tracing::error!("Failed to add actions to trigger '{}': {}", trigger, e),
        }
        result
    }

    pub fn trigger_action_remove(&self, trigger: &str, action: &str) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            inner.action(action)?;
            inner.trigger(trigger)?.remove_action(action)?;
            inner.remove_user(action, trigger);
            Ok(())
        })();
        log_relation("removed from", action, trigger, result)
    }

    pub fn trigger_reset(&self, name: &str) -> Result<()> {
        self.trigger(name)?.reset();
        tracing::debug!("Trigger '{}' reset", name);
        Ok(())
    }

    pub fn trigger_enabled_set(&self, name: &str, enabled: bool) -> Result<()> {
        self.trigger(name)?.set_enabled(enabled);
        Ok(())
    }

    pub fn trigger_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.trigger(name)?.is_enabled())
    }

    /// Change the limit; the remaining count starts over.
    pub fn trigger_limit_set(&self, name: &str, limit: TriggerLimit) -> Result<()> {
        self.trigger(name)?.set_limit(limit)
    }

    /// `None` when unlimited.
    pub fn trigger_remaining(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.trigger(name)?.remaining())
    }

    // ── Probe handlers ──

    pub fn pph_ode_new(&self, name: &str) -> Result<()> {
        self.create(name, ObjectSpec::ProbeHandler).map(|_| ())
    }

    pub fn pph_ode_trigger_add(&self, handler: &str, trigger: &str) -> Result<()> {
        self.pph_ode_trigger_add_many(handler, &[trigger])
    }

    /// Register triggers in order. A trigger can belong to one handler only.
    pub fn pph_ode_trigger_add_many(&self, handler: &str, triggers: &[&str]) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            let (target, _) = inner.handler(handler)?;
            let mut resolved = Vec::with_capacity(triggers.len());
            for (i, &name) in triggers.iter().enumerate() {
                let trigger = inner.trigger(name)?;
                if let Some(owner) = inner.first_user(name) {
                    return Err(OdeError::in_use(name, owner));
                }
                if triggers[..i].contains(&name) {
                    return Err(OdeError::in_use(name, handler));
                }
                resolved.push(trigger);
            }
            for trigger in resolved {
                target.add_trigger(trigger.clone())?;
                inner.add_user(trigger.name(), handler);
            }
            Ok(())
        })();
        match &result {
            Ok(()) => tracing::info!("Triggers {:?} added to handler '{}'", triggers, handler),
            Err(e) => tracing::error!("Failed to add triggers to handler '{}': {}", handler, e),
        }
        result
    }

    pub fn pph_ode_trigger_remove(&self, handler: &str, trigger: &str) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            inner.trigger(trigger)?;
            let (target, _) = inner.handler(handler)?;
            target.remove_trigger(trigger)?;
            inner.remove_user(trigger, handler);
            Ok(())
        })();
        log_relation("removed from", trigger, handler, result)
    }

    // ── Components ──

    pub fn component_new(&self, name: &str, kind: ComponentKind) -> Result<()> {
        self.create(name, ObjectSpec::Component(kind)).map(|_| ())
    }

    /// Message sink component publishing through `client` with JSON payloads.
    pub fn sink_message_new(
        &self,
        name: &str,
        settings: MessageSinkSettings,
        client: Box<dyn BrokerClient>,
    ) -> Result<()> {
        let adapter = match MessageSinkAdapter::with_json(
            name,
            settings,
            self.config.message_sink.clone(),
            client,
        ) {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!("Failed to create '{}': {}", name, e);
                return Err(e);
            }
        };
        self.component_new(name, ComponentKind::MessageSink(adapter))
    }

    /// Attach a probe handler to one of the component's pads.
    pub fn component_pph_add(&self, component: &str, handler: &str, pad: Pad) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            let target = inner.component(component)?;
            let (probe, attached) = inner.handler(handler)?;
            if let Some((owner, _)) = attached {
                return Err(OdeError::AlreadyAttached {
                    handler: handler.to_string(),
                    component: owner,
                });
            }
            target.attach(pad, probe);
            inner.set_attached(handler, Some((component.to_string(), pad)));
            Ok(())
        })();
        match &result {
            Ok(()) => tracing::info!("Handler '{}' attached to '{}' {} pad", handler, component, pad),
            Err(e) => tracing::error!("Failed to attach handler '{}': {}", handler, e),
        }
        result
    }

    pub fn component_pph_remove(&self, component: &str, handler: &str, pad: Pad) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            let target = inner.component(component)?;
            let (_, attached) = inner.handler(handler)?;
            if attached.as_ref() != Some(&(component.to_string(), pad)) {
                return Err(OdeError::not_found(format!("{} on {} {} pad", handler, component, pad)));
            }
            target.detach(pad, handler);
            inner.set_attached(handler, None);
            Ok(())
        })();
        log_relation("detached from", handler, component, result)
    }

    // ── Pipelines ──

    /// Pipeline without a media engine; set one with [`Registry::pipeline_engine_set`].
    pub fn pipeline_new(&self, name: &str) -> Result<()> {
        self.create(name, ObjectSpec::Pipeline { engine: None })
            .map(|_| ())
    }

    pub fn pipeline_new_with_engine(&self, name: &str, engine: Box<dyn MediaEngine>) -> Result<()> {
        self.create(
            name,
            ObjectSpec::Pipeline {
                engine: Some(engine),
            },
        )
        .map(|_| ())
    }

    pub fn pipeline_engine_set(&self, name: &str, engine: Box<dyn MediaEngine>) -> Result<()> {
        self.pipeline(name)?.set_engine(engine)
    }

    pub fn pipeline_component_add(&self, pipeline: &str, component: &str) -> Result<()> {
        self.pipeline_component_add_many(pipeline, &[component])
    }

    /// Add components in order. Either all are added or none.
    pub fn pipeline_component_add_many(&self, pipeline: &str, components: &[&str]) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            let target = inner.pipeline(pipeline)?;
            let resolved = Self::unassigned_components(&inner, components)?;
            target.add_components(&resolved)?;
            for component in components {
                inner.add_user(component, pipeline);
            }
            Ok(())
        })();
        match &result {
            Ok(()) => tracing::info!("Components {:?} added to pipeline '{}'", components, pipeline),
            Err(e) => tracing::error!("Failed to add components to pipeline '{}': {}", pipeline, e),
        }
        result
    }

    /// Create a pipeline and add `components` to it in one step.
    pub fn pipeline_new_component_add_many(&self, pipeline: &str, components: &[&str]) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            inner.ensure_unique(pipeline)?;
            let resolved = Self::unassigned_components(&inner, components)?;
            let created = Pipeline::new(pipeline, self.config.pipeline.clone());
            created.add_components(&resolved)?;
            inner.insert(pipeline, Object::Pipeline(Arc::new(created)), Vec::new())?;
            for component in components {
                inner.add_user(component, pipeline);
            }
            Ok(())
        })();
        match &result {
            Ok(()) => tracing::info!("New pipeline '{}' created with {:?}", pipeline, components),
            Err(e) => tracing::error!("Failed to create pipeline '{}': {}", pipeline, e),
        }
        result
    }

    fn unassigned_components(inner: &Inner, components: &[&str]) -> Result<Vec<Arc<Component>>> {
        let mut resolved = Vec::with_capacity(components.len());
        for (i, &name) in components.iter().enumerate() {
            let component = inner.component(name)?;
            if let Some(owner) = inner.first_user(name) {
                return Err(OdeError::in_use(name, owner));
            }
            if components[..i].contains(&name) {
                return Err(OdeError::DuplicateName(name.to_string()));
            }
            resolved.push(component);
        }
        Ok(resolved)
    }

    pub fn pipeline_component_remove(&self, pipeline: &str, component: &str) -> Result<()> {
        let mut inner = self.inner();
        let result = (|| -> Result<()> {
            let target = inner.pipeline(pipeline)?;
            inner.component(component)?;
            if !inner.entry(component)?.users.contains(pipeline) {
                return Err(OdeError::not_found(format!("{} in {}", component, pipeline)));
            }
            target.remove_component(component)?;
            inner.remove_user(component, pipeline);
            Ok(())
        })();
        log_relation("removed from", component, pipeline, result)
    }

    // Lifecycle calls clone the pipeline out and run without the registry
    // lock, since listeners fire synchronously inside them.

    pub fn pipeline_ready(&self, name: &str) -> Result<()> {
        log_lifecycle(name, "ready", self.pipeline(name).and_then(|p| p.ready()))
    }

    pub fn pipeline_play(&self, name: &str) -> Result<()> {
        log_lifecycle(name, "play", self.pipeline(name).and_then(|p| p.play()))
    }

    pub fn pipeline_pause(&self, name: &str) -> Result<()> {
        log_lifecycle(name, "pause", self.pipeline(name).and_then(|p| p.pause()))
    }

    pub fn pipeline_stop(&self, name: &str) -> Result<()> {
        log_lifecycle(name, "stop", self.pipeline(name).and_then(|p| p.stop()))
    }

    pub fn pipeline_state(&self, name: &str) -> Result<PipelineState> {
        Ok(self.pipeline(name)?.state())
    }

    pub fn pipeline_dump_to_dot(&self, name: &str) -> Result<String> {
        self.pipeline(name)?.dump_to_dot()
    }

    pub fn pipeline_state_change_listener_add<F>(&self, name: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(PipelineState, PipelineState) + Send + Sync + 'static,
    {
        Ok(self.pipeline(name)?.add_state_change_listener(listener))
    }

    pub fn pipeline_state_change_listener_remove(&self, name: &str, id: ListenerId) -> Result<()> {
        self.pipeline(name)?.remove_state_change_listener(id)
    }

    pub fn pipeline_eos_listener_add<F>(&self, name: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Ok(self.pipeline(name)?.add_eos_listener(listener))
    }

    pub fn pipeline_eos_listener_remove(&self, name: &str, id: ListenerId) -> Result<()> {
        self.pipeline(name)?.remove_eos_listener(id)
    }

    pub fn pipeline_error_listener_add<F>(&self, name: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Ok(self.pipeline(name)?.add_error_listener(listener))
    }

    pub fn pipeline_error_listener_remove(&self, name: &str, id: ListenerId) -> Result<()> {
        self.pipeline(name)?.remove_error_listener(id)
    }
}

fn log_created(name: &str, result: Result<ObjectKind>) -> Result<()> {
    match &result {
        Ok(kind) => tracing::info!("New {} '{}' created", kind, name),
        Err(e) => tracing::error!("Failed to create '{}': {}", name, e),
    }
    result.map(|_| ())
}

fn log_relation(verb: &str, child: &str, parent: &str, result: Result<()>) -> Result<()> {
    match &result {
        Ok(()) => tracing::info!("'{}' {} '{}'", child, verb, parent),
        Err(e) => tracing::error!("'{}' could not be {} '{}': {}", child, verb, parent, e),
    }
    result
}

fn log_lifecycle(name: &str, call: &str, result: Result<()>) -> Result<()> {
    if let Err(e) = &result {
        tracing::error!("Pipeline '{}' failed to {}: {}", name, call, e);
    }
    result
}

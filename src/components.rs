//! Component registry: requested counters grouped by owning subsystem.
//!
//! An event set can only hold counters of one component, and not every
//! combination of counters within a component can be counted together. The
//! registry is built once per process by [`ComponentRegistry::determine`],
//! which probes every requested counter and drops the ones that do not work
//! instead of failing the whole run.
//!
//! ```text
//!  requested: [A, B, bogus, C]
//!        │
//!        ▼  resolve + probe each counter
//!  ┌──────────────────────┐   ┌────────────────┐
//!  │ component 0: [A, C]  │   │ component 4: [B]│     bogus → warning, dropped
//!  └──────────────────────┘   └────────────────┘
//! ```

use crate::backend::{CounterBackend, EventSetHandle};
use crate::error::{BackendError, HlError, Result};
use crate::events::{default_event_specs, CounterKind, EventSpec, CYCLES, REGION_COUNT};
use crate::{hl_info, hl_warn};

/// A counter accepted into a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDescriptor {
    /// Counter name as requested (without kind suffix).
    pub name: String,
    /// Backend code of the counter.
    pub code: u32,
    /// Aggregation kind.
    pub kind: CounterKind,
}

/// Counters that share one event set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Identifier of the owning subsystem.
    pub id: u32,
    /// Counters in the order they are added to the event set.
    pub counters: Vec<CounterDescriptor>,
}

/// The determined set of components, read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRegistry {
    components: Vec<Component>,
    /// Kinds of every stored value: the two synthetic counters first, then the
    /// component counters in component order.
    kinds: Vec<CounterKind>,
}

/// A component under construction together with its probe event set.
struct ProbeComponent {
    component: Component,
    probe: EventSetHandle,
}

impl ComponentRegistry {
    /// Builds the registry from an already validated component list.
    pub(crate) fn from_components(components: Vec<Component>) -> Self {
        let kinds = [CounterKind::Delta, CounterKind::Delta]
            .into_iter()
            .chain(
                components
                    .iter()
                    .flat_map(|c| c.counters.iter().map(|d| d.kind)),
            )
            .collect();
        Self { components, kinds }
    }

    /// Determines the components for the requested counters.
    ///
    /// Falls back once to the default counter list if none of the requested
    /// counters can be used. Fails with [`HlError::InvalidArgument`] if the
    /// defaults are unusable too.
    pub fn determine(
        backend: &dyn CounterBackend,
        requested: &[EventSpec],
        multiplex: bool,
        quiet: bool,
    ) -> Result<Self> {
        match Self::build(backend, requested, multiplex, quiet) {
            Err(HlError::InvalidArgument(_)) => {
                hl_warn!(quiet, "All requested events do not work, using default.");
                let defaults = available_defaults(backend);
                Self::build(backend, &defaults, multiplex, quiet)
            }
            other => other,
        }
    }

    /// Single attempt: probes every counter, groups survivors by component.
    pub(crate) fn build(
        backend: &dyn CounterBackend,
        requested: &[EventSpec],
        multiplex: bool,
        quiet: bool,
    ) -> Result<Self> {
        let mut probes: Vec<ProbeComponent> = Vec::new();
        let outcome = add_all(backend, requested, multiplex, quiet, &mut probes);

        for probe in &probes {
            if let Err(e) = backend.destroy_event_set(probe.probe) {
                log::debug!("destroying probe event set failed: {e}");
            }
        }
        outcome?;

        let components: Vec<Component> = probes.into_iter().map(|p| p.component).collect();
        if components.is_empty() {
            return Err(HlError::InvalidArgument(
                "none of the requested events is usable".to_string(),
            ));
        }

        hl_info!(quiet, "Using the following events:");
        for counter in components.iter().flat_map(|c| &c.counters) {
            hl_info!(quiet, "  {}", counter.name);
        }

        Ok(Self::from_components(components))
    }

    /// The components in creation order.
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Number of counters across all components, without synthetic ones.
    pub fn total_counters(&self) -> usize {
        self.kinds.len() - crate::events::NUM_SYNTHETIC
    }

    /// Kinds of all stored values, synthetic counters first.
    pub(crate) fn kinds(&self) -> &[CounterKind] {
        &self.kinds
    }

    /// Names of all stored values in storage order, synthetic counters first.
    pub fn counter_names(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        [REGION_COUNT, CYCLES].into_iter().chain(
            self.components
                .iter()
                .flat_map(|c| c.counters.iter().map(|d| d.name.as_str())),
        )
    }
}

fn add_all(
    backend: &dyn CounterBackend,
    requested: &[EventSpec],
    multiplex: bool,
    quiet: bool,
    probes: &mut Vec<ProbeComponent>,
) -> Result<()> {
    for spec in requested {
        if !is_available(backend, &spec.name) {
            hl_warn!(
                quiet,
                "\"{}\" does not exist or is not supported on this machine.",
                spec.name
            );
            continue;
        }
        let resolved = backend.resolve_name(&spec.name)?;

        let index = match probes
            .iter()
            .position(|p| p.component.id == resolved.component)
        {
            Some(index) => index,
            None => {
                let probe = new_event_set(backend, resolved.component, multiplex, quiet)?;
                probes.push(ProbeComponent {
                    component: Component {
                        id: resolved.component,
                        counters: Vec::new(),
                    },
                    probe,
                });
                probes.len() - 1
            }
        };

        let probe = &mut probes[index];
        match backend.add_counter(probe.probe, resolved.code) {
            Ok(()) => probe.component.counters.push(CounterDescriptor {
                name: spec.name.clone(),
                code: resolved.code,
                kind: spec.kind,
            }),
            Err(e) => {
                hl_warn!(
                    quiet,
                    "Cannot add {} to component {} ({e}).",
                    spec.name,
                    backend.component_name(resolved.component)
                );
                hl_warn!(quiet, "The following event combination is not supported:");
                for counter in &probe.component.counters {
                    hl_warn!(quiet, "  {}", counter.name);
                }
                hl_warn!(quiet, "  {}", spec.name);
                hl_warn!(
                    quiet,
                    "Advice: choose a compatible event set for this component or set PAPI_MULTIPLEX=1."
                );
            }
        }
    }
    Ok(())
}

/// Creates an event set for `component`, multiplexed for component 0 when
/// requested. Multiplexing failures are only reported.
pub(crate) fn new_event_set(
    backend: &dyn CounterBackend,
    component: u32,
    multiplex: bool,
    quiet: bool,
) -> std::result::Result<EventSetHandle, BackendError> {
    let set = backend.create_event_set().inspect_err(|e| {
        hl_warn!(quiet, "Cannot create event set for component {component}: {e}");
    })?;
    if multiplex && component == 0 {
        if let Err(e) = backend.enable_multiplex(set, component) {
            hl_warn!(quiet, "Enabling multiplexing failed: {e}");
        }
    }
    Ok(set)
}

/// A counter is available if it resolves and can be added alone to a fresh event set.
pub(crate) fn is_available(backend: &dyn CounterBackend, name: &str) -> bool {
    let Ok(resolved) = backend.resolve_name(name) else {
        return false;
    };
    let Ok(set) = backend.create_event_set() else {
        return false;
    };
    let added = backend.add_counter(set, resolved.code).is_ok();
    let destroyed = backend.destroy_event_set(set).is_ok();
    added && destroyed
}

/// The default counters that exist on this machine.
pub(crate) fn available_defaults(backend: &dyn CounterBackend) -> Vec<EventSpec> {
    default_event_specs()
        .into_iter()
        .filter(|spec| is_available(backend, &spec.name))
        .collect()
}

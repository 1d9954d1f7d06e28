//! This module defines service templates: directed graphs of typed [components](Component)
//! connected by forward and backward [arcs](Arc).
//!
//! All components and templates of a request live in a [`TemplateSet`], which owns the component
//! records and hands out [`ComponentId`]s and [`TemplateId`]s. Sharing a component between
//! templates is sharing its ID; the [adapter](adapter) pass later splits the ports of shared
//! components so the templates cannot interfere with each other's routing.

pub mod adapter;
pub mod arc;
pub mod component;

use rustc_hash::FxHashMap;
use tracing::warn;

pub use arc::{Arc, Direction};
pub use component::{Component, ComponentId, ComponentKind};

identifier!(TemplateId, usize);

/// A service template: a named set of components and the arcs connecting their ports.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) name: String,
    pub(crate) components: Vec<ComponentId>,
    pub(crate) arcs: Vec<Arc>,
    pub(crate) source: ComponentId,
}

impl Template {
    /// The template's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The components referenced by this template.
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    /// The template's arcs.
    pub fn arcs(&self) -> &[Arc] {
        &self.arcs
    }

    /// The template's source component.
    pub fn source(&self) -> ComponentId {
        self.source
    }

    /// Returns the arc leaving `component` at `output` in `direction` together with its index,
    /// or `None` if the output belongs to a different template after port adaptation.
    pub(crate) fn out_arc(
        &self,
        component: ComponentId,
        output: usize,
        direction: Direction,
    ) -> Option<(usize, &Arc)> {
        self.arcs
            .iter()
            .enumerate()
            .find(|(_, a)| a.starts_at(direction, output, component))
    }
}

/// The components and templates of a single request.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    pub(crate) components: Vec<Component>,
    pub(crate) templates: Vec<Template>,
    by_name: FxHashMap<String, ComponentId>,
}

impl TemplateSet {
    /// Creates an empty template set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a component, deduplicating by name.
    ///
    /// Adding a component whose name is already taken returns the existing ID if all attributes
    /// match and fails otherwise, so templates sharing a component must declare it identically.
    pub fn add_component(&mut self, component: Component) -> Result<ComponentId, TemplateError> {
        component.validate()?;
        if let Some(&id) = self.by_name.get(&component.name) {
            if self.components[id.inner()] != component {
                return Err(TemplateError::InconsistentComponent {
                    name: component.name,
                });
            }
            return Ok(id);
        }
        let id = ComponentId::new(self.components.len());
        self.by_name.insert(component.name.clone(), id);
        self.components.push(component);
        Ok(id)
    }

    /// Adds a template over previously added components.
    ///
    /// Correctness properties:
    ///
    /// - The template must reference exactly one source component.
    /// - Every arc must connect ports of components in the template, within their port counts.
    /// - Each port may have at most one arc per template.
    /// - The arcs of each direction must form an acyclic graph.
    pub fn add_template(
        &mut self,
        name: impl Into<String>,
        components: Vec<ComponentId>,
        arcs: Vec<Arc>,
    ) -> Result<TemplateId, TemplateError> {
        let name = name.into();
        let mut distinct = rustc_hash::FxHashSet::default();
        if !components.iter().all(|&id| distinct.insert(id)) {
            return Err(TemplateError::DuplicateComponent { template: name });
        }
        let in_template =
            |id: ComponentId| components.contains(&id) && id.inner() < self.components.len();

        let mut sources = components
            .iter()
            .filter(|&&id| in_template(id) && self.components[id.inner()].is_source());
        let source = match (sources.next(), sources.next()) {
            (Some(&id), None) => id,
            _ => return Err(TemplateError::NotExactlyOneSource { template: name }),
        };

        let mut out_ports = FxHashMap::default();
        let mut in_ports = FxHashMap::default();
        for a in &arcs {
            if !in_template(a.source) || !in_template(a.dest) {
                return Err(TemplateError::ArcOutsideTemplate { template: name });
            }
            let src = &self.components[a.source.inner()];
            let dst = &self.components[a.dest.inner()];
            let (nr_out, nr_in) = match a.direction {
                Direction::Forward => (src.outputs, dst.inputs),
                Direction::Backward => (src.outputs_bwd, dst.inputs_bwd),
            };
            if a.src_out >= nr_out || a.dest_in >= nr_in {
                return Err(TemplateError::PortOutOfRange { template: name });
            }
            if a.max_delay < 0.0 {
                return Err(TemplateError::NegativeMaxDelay { template: name });
            }
            // CORRECTNESS: Each port may have at most one arc per template.
            if out_ports
                .insert((a.direction, a.source, a.src_out), ())
                .is_some()
                || in_ports
                    .insert((a.direction, a.dest, a.dest_in), ())
                    .is_some()
            {
                return Err(TemplateError::PortUsedTwice { template: name });
            }
        }
        for direction in [Direction::Forward, Direction::Backward] {
            if is_cyclic(&components, &arcs, direction) {
                return Err(TemplateError::CyclicTemplate { template: name });
            }
        }

        let id = TemplateId::new(self.templates.len());
        self.templates.push(Template {
            name,
            components,
            arcs,
            source,
        });
        Ok(id)
    }

    /// Returns the component with the given ID.
    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id.inner()]
    }

    /// Looks up a component by name.
    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Returns the template with the given ID.
    pub fn template(&self, id: TemplateId) -> &Template {
        &self.templates[id.inner()]
    }

    /// Returns an iterator over all template IDs.
    pub fn template_ids(&self) -> impl Iterator<Item = TemplateId> + '_ {
        (0..self.templates.len()).map(TemplateId::new)
    }

    /// Whether the set contains the given template ID.
    pub fn contains(&self, id: TemplateId) -> bool {
        id.inner() < self.templates.len()
    }

    delegate::delegate! {
        to self.templates {
            /// Returns the number of templates in the set.
            #[call(len)]
            pub fn nr_templates(&self) -> usize;
        }
    }

    /// Demotes stateful components that are not used bidirectionally by any of their templates,
    /// since the return-path constraint is meaningless without a backward traversal. Returns the
    /// demoted components.
    pub(crate) fn demote_nonbidirectional(&mut self) -> Vec<ComponentId> {
        let mut demoted = Vec::new();
        for id in (0..self.components.len()).map(ComponentId::new) {
            if !self.components[id.inner()].stateful {
                continue;
            }
            let bidirectional = self.templates.iter().any(|t| {
                t.components.contains(&id)
                    && t.arcs
                        .iter()
                        .any(|a| a.direction == Direction::Forward && a.source == id)
                    && t.arcs
                        .iter()
                        .any(|a| a.direction == Direction::Backward && a.dest == id)
            });
            if !bidirectional {
                warn!(
                    component = %self.components[id.inner()].name,
                    "stateful component is not used bidirectionally and is demoted"
                );
                self.components[id.inner()].stateful = false;
                demoted.push(id);
            }
        }
        demoted
    }

    /// Returns the template's components in topological order: breadth-first from the source
    /// along forward arcs, then breadth-first from the end components along backward arcs.
    ///
    /// A component traversed in both directions appears twice, once per direction; within each
    /// direction the last visit wins so that all of a component's predecessors come first.
    pub(crate) fn topological_component_order(&self, id: TemplateId) -> Vec<ComponentId> {
        let template = self.template(id);
        let mut fwd_order = vec![template.source];
        let mut level = vec![template.source];

        // Follow the forward arcs level by level.
        while !level.is_empty() {
            let mut next = Vec::new();
            for &j in &level {
                for a in &template.arcs {
                    if a.direction == Direction::Forward && a.source == j {
                        next.push(a.dest);
                        fwd_order.push(a.dest);
                    }
                }
            }
            level = next;
        }

        // The backward direction starts at the end components.
        level = fwd_order
            .iter()
            .copied()
            .filter(|&j| self.component(j).is_end())
            .collect();
        fwd_order.extend(level.iter().copied());

        let mut bwd_order = Vec::new();
        while !level.is_empty() {
            let mut next = Vec::new();
            for &j in &level {
                for a in &template.arcs {
                    if a.direction == Direction::Backward && a.source == j {
                        next.push(a.dest);
                        bwd_order.push(a.dest);
                    }
                }
            }
            level = next;
        }

        let mut order = dedup_keep_last(fwd_order);
        order.extend(dedup_keep_last(bwd_order));
        order
    }

    /// The template's weight: the total CPU, memory, and data rate a single source emitting
    /// `src_dr` would consume when pushed through the template. Used to embed heavy templates
    /// first.
    pub(crate) fn template_weight(&self, id: TemplateId, src_dr: f64) -> f64 {
        let template = self.template(id);
        // Outgoing rate per (component, direction, output).
        let mut out_dr: FxHashMap<(ComponentId, Direction, usize), f64> = FxHashMap::default();
        let mut total_cpu = 0.0;
        let mut total_mem = 0.0;

        // The rate arriving at an input, or zero if the port belongs to another template.
        let in_rate = |out_dr: &FxHashMap<_, f64>, j: ComponentId, k: usize, dir: Direction| {
            template
                .arcs
                .iter()
                .find(|a| a.ends_in(dir, k, j))
                .and_then(|a| out_dr.get(&(a.source, dir, a.src_out)))
                .copied()
                .unwrap_or(0.0)
        };

        let mut direction = Direction::Forward;
        let mut end_reached = false;
        for j in self.topological_component_order(id) {
            let component = self.component(j);
            if component.is_end() {
                end_reached = true;
            }
            if end_reached && !component.is_end() {
                direction = Direction::Backward;
            }
            if component.is_source() {
                if direction == Direction::Forward {
                    out_dr.insert((j, Direction::Forward, 0), src_dr);
                }
                continue;
            }

            let mut in_fwd = vec![0.0; component.inputs];
            let mut in_bwd = vec![0.0; component.inputs_bwd];
            match direction {
                Direction::Forward => {
                    for (k, rate) in in_fwd.iter_mut().enumerate() {
                        *rate = in_rate(&out_dr, j, k, Direction::Forward);
                    }
                }
                Direction::Backward => {
                    for (k, rate) in in_bwd.iter_mut().enumerate() {
                        *rate = in_rate(&out_dr, j, k, Direction::Backward);
                    }
                }
            }
            let incoming = [in_fwd.as_slice(), in_bwd.as_slice()].concat();
            total_cpu += component.cpu_req(&incoming, false);
            total_mem += component.mem_req(&incoming, false);

            if component.is_end() {
                for k_out in 0..component.outputs_bwd {
                    let rate = component.outgoing_bwd(&in_fwd, k_out);
                    out_dr.insert((j, Direction::Backward, k_out), rate);
                }
            } else {
                match direction {
                    Direction::Forward => {
                        for k_out in 0..component.outputs {
                            let rate = component.outgoing(&in_fwd, k_out);
                            out_dr.insert((j, Direction::Forward, k_out), rate);
                        }
                    }
                    Direction::Backward => {
                        for k_out in 0..component.outputs_bwd {
                            let rate = component.outgoing_bwd(&in_bwd, k_out);
                            out_dr.insert((j, Direction::Backward, k_out), rate);
                        }
                    }
                }
            }
        }

        let total_dr = out_dr.values().sum::<f64>();
        total_cpu + total_mem + total_dr
    }
}

/// Removes duplicates from an order, keeping the last occurrence of each element.
fn dedup_keep_last(order: Vec<ComponentId>) -> Vec<ComponentId> {
    let mut seen = rustc_hash::FxHashSet::default();
    let mut kept = order
        .into_iter()
        .rev()
        .filter(|&j| seen.insert(j))
        .collect::<Vec<_>>();
    kept.reverse();
    kept
}

/// Whether the arcs of the given direction contain a cycle over the template's components.
fn is_cyclic(components: &[ComponentId], arcs: &[Arc], direction: Direction) -> bool {
    let mut indegree: FxHashMap<ComponentId, usize> =
        components.iter().map(|&j| (j, 0)).collect();
    let arcs = arcs
        .iter()
        .filter(|a| a.direction == direction)
        .collect::<Vec<_>>();
    for a in &arcs {
        *indegree.entry(a.dest).or_default() += 1;
    }
    let mut queue = components
        .iter()
        .copied()
        .filter(|j| indegree[j] == 0)
        .collect::<Vec<_>>();
    let mut visited = 0;
    while let Some(j) = queue.pop() {
        visited += 1;
        for a in &arcs {
            if a.source == j {
                let d = indegree.get_mut(&a.dest).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push(a.dest);
                }
            }
        }
    }
    visited != components.len()
}

/// An error type listing the reasons a template set is invalid.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// A component's port counts and coefficient vectors do not line up.
    #[error("component {name} is malformed: {what}")]
    MalformedComponent {
        /// The component's name.
        name: String,
        /// What is wrong with it.
        what: String,
    },

    /// The same component name was declared twice with different attributes.
    #[error("inconsistent declarations of component {name}")]
    InconsistentComponent {
        /// The component's name.
        name: String,
    },

    /// A template lists the same component twice.
    #[error("template {template} lists a component twice")]
    DuplicateComponent {
        /// The template's name.
        template: String,
    },

    /// A template must have exactly one source component.
    #[error("template {template} does not have exactly one source component")]
    NotExactlyOneSource {
        /// The template's name.
        template: String,
    },

    /// An arc references a component outside the template.
    #[error("template {template} has an arc referencing a component outside the template")]
    ArcOutsideTemplate {
        /// The template's name.
        template: String,
    },

    /// An arc references a port beyond the component's port count.
    #[error("template {template} has an arc referencing a port that does not exist")]
    PortOutOfRange {
        /// The template's name.
        template: String,
    },

    /// An arc has a negative maximum delay.
    #[error("template {template} has an arc with a negative maximum delay")]
    NegativeMaxDelay {
        /// The template's name.
        template: String,
    },

    /// Two arcs of one template share a port.
    #[error("template {template} uses a port twice")]
    PortUsedTwice {
        /// The template's name.
        template: String,
    },

    /// The arcs of one direction form a cycle.
    #[error("template {template} contains a cycle")]
    CyclicTemplate {
        /// The template's name.
        template: String,
    },

    /// A source component cannot be shared between templates.
    #[error("source component {name} cannot be reused")]
    ReusedSource {
        /// The component's name.
        name: String,
    },

    /// The ports of a shared component must all be used the same number of times.
    #[error("ports of component {name} are not all used the same number of times")]
    NonUniformReuse {
        /// The component's name.
        name: String,
    },
}

//! Template adaptation for component reuse.
//!
//! A component referenced by multiple templates would let flows of one template leave through an
//! output another template routes, so every shared component is rewritten before embedding: its
//! ports are multiplied by the number of reusing templates and each template's arcs are shifted
//! onto a disjoint port range. The rewrite happens on the component records themselves; the
//! placement heuristic never needs to know which components were shared.

use itertools::Itertools;

use crate::template::component::ComponentId;
use crate::template::{Direction, TemplateError, TemplateSet};

/// Rewrites all shared components of the set for reuse and shifts the templates' arcs onto
/// disjoint port ranges. Idempotent: ports of an already adapted component are each used exactly
/// once, so a second pass finds nothing to do.
pub(crate) fn adapt_for_reuse(set: &mut TemplateSet) -> Result<(), TemplateError> {
    let ids = (0..set.components.len()).map(ComponentId::new);
    let mut adapted = Vec::new();
    for id in ids {
        let uses = reuses(set, id)?;
        if uses < 2 {
            continue;
        }
        if set.component(id).is_source() {
            return Err(TemplateError::ReusedSource {
                name: set.component(id).name.clone(),
            });
        }
        set.components[id.inner()].adapt(uses);
        adapted.push((id, uses));
    }

    // Move each template's arcs to their own port range of the expanded component.
    for (id, uses) in adapted {
        let mut offset = 0;
        for template in set.templates.iter_mut() {
            let mut shifted = false;
            for a in template.arcs.iter_mut() {
                if a.dest == id {
                    a.dest_in += offset;
                    shifted = true;
                }
                if a.source == id {
                    a.src_out += offset;
                    shifted = true;
                }
            }
            if shifted {
                debug_assert!(offset < uses, "more templates shifted than counted reuses");
                offset += 1;
            }
        }
    }
    Ok(())
}

/// Counts how often the component's ports are used across all templates. Every port must be used
/// the same number of times; that number is the count of templates routing through the
/// component.
fn reuses(set: &TemplateSet, id: ComponentId) -> Result<usize, TemplateError> {
    let component = set.component(id);
    let arcs = || set.templates.iter().flat_map(|t| t.arcs.iter());

    let mut counts = Vec::new();
    for k in 0..component.inputs {
        counts.push(arcs().filter(|a| a.ends_in(Direction::Forward, k, id)).count());
    }
    for k in 0..component.outputs {
        counts.push(
            arcs()
                .filter(|a| a.starts_at(Direction::Forward, k, id))
                .count(),
        );
    }
    for k in 0..component.inputs_bwd {
        counts.push(
            arcs()
                .filter(|a| a.ends_in(Direction::Backward, k, id))
                .count(),
        );
    }
    for k in 0..component.outputs_bwd {
        counts.push(
            arcs()
                .filter(|a| a.starts_at(Direction::Backward, k, id))
                .count(),
        );
    }

    match counts.iter().unique().exactly_one() {
        Ok(&uses) => Ok(uses),
        Err(_) if counts.is_empty() => Ok(1),
        Err(_) => Err(TemplateError::NonUniformReuse {
            name: component.name.clone(),
        }),
    }
}

//! Template components and their linear resource and rate functions.

use crate::template::TemplateError;

identifier!(ComponentId, usize);

/// The role of a component within its template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ComponentKind {
    /// Emits flows into the template; has no forward inputs and a single implicit forward output.
    Source,
    /// A regular processing function.
    Normal,
    /// Terminates the forward direction and turns flows around into the backward direction.
    End,
}

/// A typed component of a template graph.
///
/// Resource consumption and outgoing rates are linear functions of the ingoing data rates. The
/// `cpu` and `mem` vectors hold one coefficient per forward input, then one per backward input,
/// then the idle consumption. Each output's rate vector holds one coefficient per input of the
/// respective direction, then the idle rate.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct Component {
    /// The component's name, unique within a request.
    #[builder(setter(into))]
    pub name: String,
    /// The component's role.
    pub kind: ComponentKind,
    /// Whether flows must return through the same instance they passed in forward direction.
    #[builder(default)]
    pub stateful: bool,
    /// Number of forward inputs.
    #[builder(default)]
    pub inputs: usize,
    /// Number of backward inputs.
    #[builder(default)]
    pub inputs_bwd: usize,
    /// Number of forward outputs.
    #[builder(default)]
    pub outputs: usize,
    /// Number of backward outputs.
    #[builder(default)]
    pub outputs_bwd: usize,
    /// CPU coefficients, one per input plus the idle consumption.
    pub cpu: Vec<f64>,
    /// Memory coefficients, one per input plus the idle consumption.
    pub mem: Vec<f64>,
    /// Outgoing rate coefficients per forward output.
    #[builder(default)]
    pub dr_fwd: Vec<Vec<f64>>,
    /// Outgoing rate coefficients per backward output.
    #[builder(default)]
    pub dr_bwd: Vec<Vec<f64>>,
    /// Processing delay added by every instance of this component.
    #[builder(default)]
    pub vnf_delay: f64,
}

impl Component {
    /// Whether this is a source component.
    pub fn is_source(&self) -> bool {
        self.kind == ComponentKind::Source
    }

    /// Whether this is an end component.
    pub fn is_end(&self) -> bool {
        self.kind == ComponentKind::End
    }

    /// The total number of inputs across both directions.
    pub fn total_inputs(&self) -> usize {
        self.inputs + self.inputs_bwd
    }

    /// Checks the port counts and coefficient vector lengths against each other.
    pub(crate) fn validate(&self) -> Result<(), TemplateError> {
        let err = |what: &str| {
            Err(TemplateError::MalformedComponent {
                name: self.name.clone(),
                what: what.to_owned(),
            })
        };
        if self.cpu.len() != self.total_inputs() + 1 {
            return err("inputs and CPU coefficients mismatch or missing idle consumption");
        }
        if self.mem.len() != self.total_inputs() + 1 {
            return err("inputs and memory coefficients mismatch or missing idle consumption");
        }
        match self.kind {
            ComponentKind::Source => {
                if self.inputs != 0 {
                    return err("source components have no forward inputs");
                }
                if self.outputs != 1 {
                    return err("source components have exactly one forward output");
                }
                if self.outputs_bwd != 0 || !self.dr_bwd.is_empty() {
                    return err("source components have no backward outputs");
                }
                if !self.dr_fwd.is_empty() {
                    return err("source components emit their flows' rates directly");
                }
            }
            ComponentKind::Normal | ComponentKind::End => {
                if self.is_end() && (self.outputs != 0 || !self.dr_fwd.is_empty()) {
                    return err("end components have no forward outputs");
                }
                if self.dr_fwd.len() != self.outputs {
                    return err("forward outputs and rate functions mismatch");
                }
                for row in &self.dr_fwd {
                    if row.len() != self.inputs + 1 {
                        return err("forward rate function has the wrong number of coefficients");
                    }
                }
                if self.dr_bwd.len() != self.outputs_bwd {
                    return err("backward outputs and rate functions mismatch");
                }
                // End components turn forward traffic around, so their backward rates are
                // functions of the forward inputs.
                let bwd_coeffs = if self.is_end() {
                    self.inputs
                } else {
                    self.inputs_bwd
                };
                for row in &self.dr_bwd {
                    if row.len() != bwd_coeffs + 1 {
                        return err("backward rate function has the wrong number of coefficients");
                    }
                }
            }
        }
        if self.vnf_delay < 0.0 {
            return err("processing delay must be non-negative");
        }
        Ok(())
    }

    /// CPU requirement for the given ingoing data rates. The idle consumption is skipped when
    /// `ignore_idle` is set.
    pub fn cpu_req(&self, incoming: &[f64], ignore_idle: bool) -> f64 {
        Self::linear(&self.cpu, incoming, ignore_idle)
    }

    /// Memory requirement for the given ingoing data rates. The idle consumption is skipped when
    /// `ignore_idle` is set.
    pub fn mem_req(&self, incoming: &[f64], ignore_idle: bool) -> f64 {
        Self::linear(&self.mem, incoming, ignore_idle)
    }

    fn linear(coeffs: &[f64], incoming: &[f64], ignore_idle: bool) -> f64 {
        debug_assert_eq!(coeffs.len(), incoming.len() + 1);
        let idle = if ignore_idle {
            0.0
        } else {
            *coeffs.last().unwrap()
        };
        incoming
            .iter()
            .zip(coeffs)
            .map(|(dr, c)| dr * c)
            .sum::<f64>()
            + idle
    }

    /// Outgoing data rate at the given forward output for a vector of forward ingoing rates.
    pub fn outgoing(&self, in_vector: &[f64], output: usize) -> f64 {
        let coeffs = &self.dr_fwd[output];
        let idle = *coeffs.last().unwrap();
        in_vector
            .iter()
            .take(self.inputs)
            .zip(coeffs)
            .map(|(dr, c)| dr * c)
            .sum::<f64>()
            + idle
    }

    /// Outgoing data rate at the given backward output. For end components the ingoing vector
    /// holds the forward ingoing rates, for all others the backward ingoing rates.
    pub fn outgoing_bwd(&self, in_vector: &[f64], output: usize) -> f64 {
        let coeffs = &self.dr_bwd[output];
        let idle = *coeffs.last().unwrap();
        in_vector.iter().zip(coeffs).map(|(dr, c)| dr * c).sum::<f64>() + idle
    }

    /// Expands this component's ports so that `reuses` templates can route through it without
    /// sharing ports. Every port is split into `reuses` new ports, the resource coefficients are
    /// duplicated per input, and each new output depends only on the new input with the same
    /// offset. A component used by a single template is left untouched.
    pub(crate) fn adapt(&mut self, reuses: usize) {
        if reuses < 2 {
            return;
        }

        let expand = |coeffs: &[f64], inputs: usize| {
            let mut new = Vec::with_capacity(inputs * reuses + 1);
            for k in 0..inputs {
                for _ in 0..reuses {
                    new.push(coeffs[k]);
                }
            }
            new.push(*coeffs.last().unwrap());
            new
        };
        self.cpu = expand(&self.cpu, self.total_inputs());
        self.mem = expand(&self.mem, self.total_inputs());

        // Each original output becomes `reuses` outputs whose rate depends only on the matching
        // new input (diagonal expansion).
        let diagonalize = |rates: &[Vec<f64>], inputs: usize| {
            let mut new = Vec::with_capacity(rates.len() * reuses);
            for old in rates {
                for new_out in 0..reuses {
                    let mut row = Vec::with_capacity(inputs * reuses + 1);
                    for old_in in 0..inputs {
                        for new_in in 0..reuses {
                            row.push(if new_out == new_in { old[old_in] } else { 0.0 });
                        }
                    }
                    row.push(*old.last().unwrap());
                    new.push(row);
                }
            }
            new
        };
        self.dr_fwd = diagonalize(&self.dr_fwd, self.inputs);
        self.dr_bwd = diagonalize(&self.dr_bwd, self.inputs_bwd);

        self.inputs *= reuses;
        self.outputs *= reuses;
        self.inputs_bwd *= reuses;
        self.outputs_bwd *= reuses;
    }
}

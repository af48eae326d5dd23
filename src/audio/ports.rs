use anyhow::{Context, Result};
use jack::{AudioIn, AudioOut, Client, Port, ProcessScope};

pub const INPUT_PORT: &str = "in_port";
pub const OUTPUT_LEFT_PORT: &str = "out_port_left";
pub const OUTPUT_RIGHT_PORT: &str = "out_port_right";

/// One mono input, mirrored onto a left/right output pair.
pub struct Ports {
    input: Port<AudioIn>,
    outputs: [Port<AudioOut>; 2],
}

impl Ports {
    pub fn register(client: &Client) -> Result<Self> {
        let output = |name: &str| {
            client
                .register_port(name, AudioOut::default())
                .with_context(|| format!("failed to register {name}"))
        };

        Ok(Self {
            input: client
                .register_port(INPUT_PORT, AudioIn::default())
                .with_context(|| format!("failed to register {INPUT_PORT}"))?,
            outputs: [output(OUTPUT_LEFT_PORT)?, output(OUTPUT_RIGHT_PORT)?],
        })
    }

    pub fn input<'a>(&'a self, ps: &'a ProcessScope) -> &'a [f32] {
        self.input.as_slice(ps)
    }

    /// Copies `rendered` to both outputs and zeroes whatever it does not cover.
    /// `None` silences the whole cycle.
    pub fn emit(&mut self, ps: &ProcessScope, rendered: Option<&[f32]>) {
        let rendered = rendered.unwrap_or_default();
        for port in &mut self.outputs {
            let out = port.as_mut_slice(ps);
            let (covered, rest) = out.split_at_mut(rendered.len().min(out.len()));
            covered.copy_from_slice(&rendered[..covered.len()]);
            rest.fill(0.0);
        }
    }
}

//! Named parameter store.
//!
//! Every learned array (cell kernels, layer-norm scale/shift, RNN weights) is
//! addressed by a `/`-joined name such as
//! `MultiDimensionalLSTMCell-layer1/i/layer_norm/scale`. The first request for
//! a name creates the array with the given initializer; later requests return
//! the same array, so one cell applied at every grid position shares a single
//! parameter set.
//!
//! Random initialization is seeded from the store seed mixed with a hash of
//! the variable name, so a parameter's initial value does not depend on the
//! order in which parameters are first requested.

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD, ArrayView2, Ix1, Ix2, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

use crate::config::DEFAULT_SEED;
use crate::error::{GlimpseError, Result};

/// How a parameter is filled on creation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Initializer {
    Zeros,
    Constant(f32),
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform,
}

/// A hierarchical variable-name prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scope {
    path: String,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(name: &str) -> Self {
        Self::root().child(name)
    }

    /// Nested scope `self/name`.
    pub fn child(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        if self.path.is_empty() {
            Self {
                path: name.to_string(),
            }
        } else if name.is_empty() {
            self.clone()
        } else {
            Self {
                path: format!("{}/{}", self.path, name),
            }
        }
    }

    /// Full name of variable `name` inside this scope.
    pub fn var(&self, name: &str) -> String {
        self.child(name).path
    }
}

/// The enclosing parameter namespace.
#[derive(Clone, Debug)]
pub struct ParamStore {
    params: BTreeMap<String, ArrayD<f32>>,
    seed: u64,
}

impl ParamStore {
    pub fn new(seed: u64) -> Self {
        Self {
            params: BTreeMap::new(),
            seed,
        }
    }

    /// Return the parameter `name`, creating it if it does not exist yet.
    ///
    /// Fails with [`GlimpseError::ShapeMismatch`] when `name` already exists
    /// with a different shape.
    pub fn get_or_create(
        &mut self,
        name: &str,
        shape: &[usize],
        init: Initializer,
    ) -> Result<&ArrayD<f32>> {
        if !self.params.contains_key(name) {
            let value = self.initialize(name, shape, init);
            self.params.insert(name.to_string(), value);
        }
        let existing = self
            .params
            .get(name)
            .ok_or_else(|| GlimpseError::shape(format!("parameter '{name}' vanished")))?;
        if existing.shape() != shape {
            return Err(GlimpseError::ShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                got: existing.shape().to_vec(),
            });
        }
        Ok(existing)
    }

    /// Owned copy of a rank-1 parameter, created on first use.
    pub fn vector(&mut self, name: &str, len: usize, init: Initializer) -> Result<Array1<f32>> {
        let value = self.get_or_create(name, &[len], init)?.clone();
        value
            .into_dimensionality::<Ix1>()
            .map_err(|e| GlimpseError::shape(format!("parameter '{name}': {e}")))
    }

    /// Borrowed view of a rank-2 parameter, created on first use.
    pub fn matrix_view(
        &mut self,
        name: &str,
        rows: usize,
        cols: usize,
        init: Initializer,
    ) -> Result<ArrayView2<'_, f32>> {
        self.get_or_create(name, &[rows, cols], init)?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| GlimpseError::shape(format!("parameter '{name}': {e}")))
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.params.get(name)
    }

    /// Overwrite an existing parameter or insert a new one.
    ///
    /// Replacing an existing parameter with a differently shaped array is a
    /// [`GlimpseError::ShapeMismatch`].
    pub fn set(&mut self, name: &str, value: ArrayD<f32>) -> Result<()> {
        if let Some(existing) = self.params.get(name) {
            if existing.shape() != value.shape() {
                return Err(GlimpseError::ShapeMismatch {
                    name: name.to_string(),
                    expected: existing.shape().to_vec(),
                    got: value.shape().to_vec(),
                });
            }
        }
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn param_count(&self) -> usize {
        self.params.values().map(|p| p.len()).sum()
    }

    fn initialize(&self, name: &str, shape: &[usize], init: Initializer) -> ArrayD<f32> {
        match init {
            Initializer::Zeros => ArrayD::zeros(IxDyn(shape)),
            Initializer::Constant(v) => ArrayD::from_elem(IxDyn(shape), v),
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = fans(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                let mut rng = StdRng::seed_from_u64(self.seed ^ fnv1a(name));
                let dist = Uniform::new_inclusive(-limit, limit);
                ArrayD::from_shape_simple_fn(IxDyn(shape), || dist.sample(&mut rng))
            }
        }
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

/// `(fan_in, fan_out)` for a kernel: the last axis is the output axis.
fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [rest @ .., out] => (rest.iter().product(), *out),
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

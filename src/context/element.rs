//! Element formats: the scalar/vector type stored per binding element.

use std::fmt;
use std::str::FromStr;

use crate::error::FormatError;

/// Scalar kind of an element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Int,
    Uint,
}

/// GLSL element type of a binding, e.g. `float[]`, `vec3`, `ivec2[]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementFormat {
    pub scalar: ScalarKind,
    /// 1 for scalars, 2..=4 for vectors.
    pub components: u32,
    /// Whether the binding holds an array of elements (`[]` suffix).
    pub array: bool,
}

impl ElementFormat {
    pub const FLOAT: Self = Self::new(ScalarKind::Float, 1, false);
    pub const FLOAT_ARRAY: Self = Self::new(ScalarKind::Float, 1, true);
    pub const VEC2_ARRAY: Self = Self::new(ScalarKind::Float, 2, true);
    pub const VEC3_ARRAY: Self = Self::new(ScalarKind::Float, 3, true);
    pub const VEC4_ARRAY: Self = Self::new(ScalarKind::Float, 4, true);

    pub const fn new(scalar: ScalarKind, components: u32, array: bool) -> Self {
        Self {
            scalar,
            components,
            array,
        }
    }

    /// The GLSL type of a single element, without the array suffix.
    pub fn glsl_type(&self) -> String {
        let (scalar, prefix) = match self.scalar {
            ScalarKind::Float => ("float", ""),
            ScalarKind::Int => ("int", "i"),
            ScalarKind::Uint => ("uint", "u"),
        };
        match self.components {
            1 => scalar.to_string(),
            n => format!("{}vec{}", prefix, n),
        }
    }

    /// Channel selector applied to a sampled texel.
    pub fn swizzle(&self) -> &'static str {
        match self.components {
            2 => ".rg",
            3 => ".rgb",
            4 => ".rgba",
            _ => ".r",
        }
    }

    /// Element stride in floats inside a std430 storage buffer.
    pub fn std430_stride(&self) -> usize {
        match self.components {
            3 => 4,
            n => n as usize,
        }
    }

    /// The same format as a single element (array suffix dropped).
    pub fn element(&self) -> Self {
        Self {
            array: false,
            ..*self
        }
    }
}

impl fmt::Display for ElementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.glsl_type())?;
        if self.array {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

impl FromStr for ElementFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (base, array) = match trimmed.strip_suffix("[]") {
            Some(base) => (base.trim_end(), true),
            None => (trimmed, false),
        };
        let parsed = match base {
            "float" => Some((ScalarKind::Float, 1)),
            "int" => Some((ScalarKind::Int, 1)),
            "uint" => Some((ScalarKind::Uint, 1)),
            _ => vector_format(base),
        };
        match parsed {
            Some((scalar, components)) => Ok(Self::new(scalar, components, array)),
            None => Err(FormatError(s.to_string())),
        }
    }
}

fn vector_format(base: &str) -> Option<(ScalarKind, u32)> {
    let (scalar, rest) = if let Some(rest) = base.strip_prefix("ivec") {
        (ScalarKind::Int, rest)
    } else if let Some(rest) = base.strip_prefix("uvec") {
        (ScalarKind::Uint, rest)
    } else {
        (ScalarKind::Float, base.strip_prefix("vec")?)
    };
    match rest {
        "2" => Some((scalar, 2)),
        "3" => Some((scalar, 3)),
        "4" => Some((scalar, 4)),
        _ => None,
    }
}

impl TryFrom<String> for ElementFormat {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ElementFormat> for String {
    fn from(value: ElementFormat) -> Self {
        value.to_string()
    }
}

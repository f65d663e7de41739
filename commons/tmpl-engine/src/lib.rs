//! Template instantiation engine.
//!
//! Everything here is pure: parameter resolution, placeholder
//! substitution, the legacy text-template renderer and the string codecs
//! used to encode ownership in finalizers and labels. Cluster access lives
//! in `tmpl-operator`.

pub mod codec;
pub mod document;
pub mod param;
pub mod substitute;
pub mod text_template;
pub mod value;

pub use codec::{ClaimRef, CodecError, DependentRef};
pub use document::{DocumentError, ObjectDocument};
pub use param::{ParamError, ParamSpec, ResolvedParams, resolve};
pub use substitute::substitute;
pub use text_template::{RenderError, render_sources};
pub use value::{TypedValue, ValueType};

pub use crate::normalization::Normalization;
pub use crate::time::timestamp;
pub use crate::{Classification, ImageTensor, Label, Probabilities};
pub use strum::{EnumCount, IntoEnumIterator};

use std::fmt;

/// Device ordinal used for tensors resident in host memory.
pub const HOST_DEVICE: i64 = -1;

/// Enumerates scalar element types carried by tensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    I1,
    Si32,
    Si64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I1 => "i1",
            DType::Si32 => "si32",
            DType::Si64 => "si64",
            DType::F16 => "f16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Tensor metadata coupling dtype, device residency, and layout.
///
/// `device` is an accelerator ordinal; [`HOST_DEVICE`] marks host memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    dtype: DType,
    device: i64,
    sizes: Vec<i64>,
    strides: Vec<i64>,
}

impl TensorType {
    /// Creates a contiguous tensor type with row-major strides for `sizes`.
    pub fn contiguous_with(dtype: DType, device: i64, sizes: Vec<i64>) -> Self {
        let strides = contiguous_strides(&sizes);
        TensorType {
            dtype,
            device,
            sizes,
            strides,
        }
    }

    /// Creates a tensor type with explicit strides.
    pub fn strided(dtype: DType, device: i64, sizes: Vec<i64>, strides: Vec<i64>) -> Self {
        assert_eq!(
            sizes.len(),
            strides.len(),
            "tensor sizes and strides must have equal rank"
        );
        TensorType {
            dtype,
            device,
            sizes,
            strides,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> i64 {
        self.device
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    /// Total element count.
    pub fn numel(&self) -> i64 {
        self.sizes.iter().product()
    }

    /// Returns a copy of this type with the provided sizes and strides,
    /// keeping dtype and device.
    pub fn with_sizes_strides(&self, sizes: Vec<i64>, strides: Vec<i64>) -> TensorType {
        TensorType::strided(self.dtype, self.device, sizes, strides)
    }

    /// Returns a copy of this type with the same sizes and row-major strides.
    pub fn contiguous(&self) -> TensorType {
        TensorType::contiguous_with(self.dtype, self.device, self.sizes.clone())
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_strides(&self.sizes)
    }
}

fn contiguous_strides(sizes: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1].max(1);
    }
    strides
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{}, ", self.dtype)?;
        for (i, size) in self.sizes.iter().enumerate() {
            if i > 0 {
                f.write_str("x")?;
            }
            write!(f, "{size}")?;
        }
        if !self.is_contiguous() {
            write!(f, ", strides={:?}", self.strides)?;
        }
        if self.device == HOST_DEVICE {
            f.write_str(", host")?;
        } else {
            write!(f, ", dev{}", self.device)?;
        }
        f.write_str(">")
    }
}

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Flat typed buffer carried between nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub data: Vec<T>,
}

impl<T> Tensor<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    I64,
    Bool,
}

impl DType {
    pub fn from_ident(ident: &str) -> Result<Self> {
        match ident {
            "f32" => Ok(DType::F32),
            "i64" => Ok(DType::I64),
            "bool" => Ok(DType::Bool),
            _ => Err(anyhow!("unsupported dtype: {}", ident)),
        }
    }
}

/// Type-erased tensor moved through placeholder bindings. The engine never
/// inspects element values; device functions do.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
    F32(Tensor<f32>),
    I64(Tensor<i64>),
    Bool(Tensor<bool>),
}

impl TensorValue {
    pub fn dtype(&self) -> DType {
        match self {
            TensorValue::F32(_) => DType::F32,
            TensorValue::I64(_) => DType::I64,
            TensorValue::Bool(_) => DType::Bool,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorValue::F32(tensor) => tensor.len(),
            TensorValue::I64(tensor) => tensor.len(),
            TensorValue::Bool(tensor) => tensor.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => TensorValue::F32(Tensor::new(vec![0.0; len])),
            DType::I64 => TensorValue::I64(Tensor::new(vec![0; len])),
            DType::Bool => TensorValue::Bool(Tensor::new(vec![false; len])),
        }
    }

    pub fn as_f32(&self) -> Result<&Tensor<f32>> {
        match self {
            TensorValue::F32(tensor) => Ok(tensor),
            _ => Err(anyhow!("expected f32 tensor, got {:?}", self.dtype())),
        }
    }

    pub fn as_i64(&self) -> Result<&Tensor<i64>> {
        match self {
            TensorValue::I64(tensor) => Ok(tensor),
            _ => Err(anyhow!("expected i64 tensor, got {:?}", self.dtype())),
        }
    }

    pub fn as_bool(&self) -> Result<&Tensor<bool>> {
        match self {
            TensorValue::Bool(tensor) => Ok(tensor),
            _ => Err(anyhow!("expected bool tensor, got {:?}", self.dtype())),
        }
    }
}

impl From<Vec<f32>> for TensorValue {
    fn from(value: Vec<f32>) -> Self {
        TensorValue::F32(Tensor::new(value))
    }
}

impl From<Vec<i64>> for TensorValue {
    fn from(value: Vec<i64>) -> Self {
        TensorValue::I64(Tensor::new(value))
    }
}

impl From<Vec<bool>> for TensorValue {
    fn from(value: Vec<bool>) -> Self {
        TensorValue::Bool(Tensor::new(value))
    }
}

impl<T> From<Tensor<T>> for TensorValue
where
    Vec<T>: Into<TensorValue>,
{
    fn from(value: Tensor<T>) -> Self {
        value.data.into()
    }
}

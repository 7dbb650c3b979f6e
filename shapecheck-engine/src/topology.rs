//! Declared hardware topology per shape
//!
//! Loaded from the `hpc-shapes` section of the shapes document:
//!
//! ```json
//! {"hpc-shapes": [{
//!     "shape": "BM.GPU.H100.8",
//!     "gpu": [{"pci": "0000:0f:00.0", "model": "NVIDIA H100 80GB HBM3", "id": 0, "module_id": 2}],
//!     "vcn-nics": [],
//!     "rdma-nics": [{"pci": "0000:0c:00.0", "device_name": "mlx5_0", "gpu_pci": "0000:0f:00.0", "gpu_id": "0"}]
//! }]}
//! ```
//!
//! `gpu` is `false` on CPU-only shapes; it is collapsed to an empty list here.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Whole shapes document. Sections other than `hpc-shapes` are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShapesDocument {
    #[serde(rename = "hpc-shapes", default)]
    pub shapes: Vec<ShapeRecord>,
}

/// One shape as written in the document
#[derive(Debug, Clone, Deserialize)]
pub struct ShapeRecord {
    pub shape: String,
    #[serde(default)]
    pub gpu: Option<GpuField>,
    #[serde(rename = "rdma-nics", default)]
    pub rdma_nics: Vec<NicEntry>,
    #[serde(rename = "vcn-nics", default)]
    pub vcn_nics: Vec<NicEntry>,
}

/// `gpu` is either a boolean marker or the GPU list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GpuField {
    Marker(bool),
    List(Vec<GpuEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuEntry {
    pub pci: String,
    #[serde(default)]
    pub model: String,
    /// Logical index as enumerated by the driver
    #[serde(rename = "id", default)]
    pub index: Option<u32>,
    /// Physical module slot
    #[serde(default, deserialize_with = "loose_id")]
    pub module_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicEntry {
    pub pci: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub gpu_pci: Option<String>,
    #[serde(default, deserialize_with = "loose_id")]
    pub gpu_id: Option<String>,
}

/// Declared inventory for one shape, GPUs always as a list
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShapeTopology {
    pub shape: String,
    pub gpus: Vec<GpuEntry>,
    pub rdma_nics: Vec<NicEntry>,
    pub vcn_nics: Vec<NicEntry>,
}

/// Something declared in a topology that can be matched against hardware
pub trait Declared {
    fn pci(&self) -> &str;

    /// Name used when reporting this entry
    fn label(&self) -> String;

    /// RDMA device name (`mlx5_0`), when the entry has one
    fn device_name(&self) -> Option<&str> {
        None
    }
}

impl Declared for GpuEntry {
    fn pci(&self) -> &str {
        &self.pci
    }

    fn label(&self) -> String {
        if self.pci.is_empty() {
            match self.index {
                Some(index) => format!("GPU {}", index),
                None => "GPU".to_string(),
            }
        } else {
            self.pci.clone()
        }
    }
}

impl Declared for NicEntry {
    fn pci(&self) -> &str {
        &self.pci
    }

    fn label(&self) -> String {
        if self.device_name.is_empty() {
            self.pci.clone()
        } else {
            self.device_name.clone()
        }
    }

    fn device_name(&self) -> Option<&str> {
        if self.device_name.trim().is_empty() {
            None
        } else {
            Some(self.device_name.as_str())
        }
    }
}

impl ShapesDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        let document: ShapesDocument = serde_json::from_str(text)?;
        debug!("Loaded shapes document with {} shapes", document.shapes.len());
        Ok(document)
    }

    pub fn shape_names(&self) -> Vec<&str> {
        self.shapes.iter().map(|s| s.shape.as_str()).collect()
    }

    /// Topology of one shape. The first record wins if a shape is listed twice.
    pub fn topology(&self, shape: &str) -> Result<ShapeTopology> {
        let record = self
            .shapes
            .iter()
            .find(|record| record.shape == shape)
            .ok_or_else(|| EngineError::UnknownShape(shape.to_string()))?;
        record.clone().into_topology()
    }
}

impl ShapeRecord {
    pub fn into_topology(self) -> Result<ShapeTopology> {
        let gpus = match self.gpu {
            None | Some(GpuField::Marker(false)) => Vec::new(),
            Some(GpuField::List(list)) => list,
            Some(GpuField::Marker(true)) => {
                return Err(EngineError::InvalidTopology(format!(
                    "shape {} marks gpu as true without listing devices",
                    self.shape
                )))
            }
        };

        Ok(ShapeTopology {
            shape: self.shape,
            gpus,
            rdma_nics: self.rdma_nics,
            vcn_nics: self.vcn_nics,
        })
    }
}

impl ShapeTopology {
    pub fn has_gpus(&self) -> bool {
        !self.gpus.is_empty()
    }
}

/// Accept ids written either as numbers or strings
fn loose_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Loose>::deserialize(deserializer)?.map(|value| match value {
        Loose::Number(n) => n.to_string(),
        Loose::Text(s) => s,
    }))
}

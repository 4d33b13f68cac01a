use std::fs;
use std::path::Path;

use serde::{ Serialize, Deserialize, de::DeserializeOwned };
use tracing::debug;

use crate::{
  error::{ Error, Result },
  shape::Shape,
  tensor::Tensor,
  scalar::Real,
  node::{ Graph, Kind },
};


#[derive(Debug, Serialize, Deserialize)]
struct ParameterDump<T> {
  full_name: String,
  dims: Vec<usize>,
  data: Vec<T>,
}


#[derive(Debug, Serialize, Deserialize)]
struct GraphDump<T> {
  parameters: Vec<ParameterDump<T>>,
}


impl<T: Real + Serialize + DeserializeOwned> Graph<T> {
  /// Write the value of every parameter to `path`.

  pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
    let parameters = self.with(|arena| arena.live()
      .filter(|record| matches!(record.kind, Kind::Parameter { .. }) )
      .filter_map(|record| record.value.as_ref().map(|value| ParameterDump {
        full_name: record.full_name.clone(),
        dims: value.dims().to_vec(),
        data: value.raw().to_vec(),
      }))
      .collect::<Vec<_>>());
    let count = parameters.len();
    let bytes = postcard::to_allocvec(&GraphDump { parameters })
      .map_err(|e| Error::Snapshot(e.to_string()) )?;
    fs::write(path, bytes)?;
    debug!(graph = %self.name(), parameters = count, "saved");
    Ok(())
  }

  /// Restore parameter values written by [Graph::save].
  ///
  /// Every stored parameter must exist in this graph under the same
  /// full name and shape. Nothing is assigned unless all of them match.

  pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
    let bytes = fs::read(path)?;
    let dump: GraphDump<T> = postcard::from_bytes(&bytes)
      .map_err(|e| Error::Snapshot(e.to_string()) )?;
    let mut assignments = Vec::with_capacity(dump.parameters.len());
    for param in dump.parameters {
      let node = self.lookup(&param.full_name)?;
      if !node.is_parameter()? {
        return Err(Error::NotFound { name: param.full_name, graph: self.name() })
      }
      let shape = Shape::new(&param.dims);
      if shape.size() != param.data.len() {
        return Err(Error::Snapshot(format!("{} holds {} values for {shape}", param.full_name, param.data.len())))
      }
      if shape != node.shape()? {
        return Err(Error::shape(format!("loading {}", param.full_name), node.shape()?.to_string(), &shape))
      }
      assignments.push((node, Tensor::from_shape(shape, param.data)));
    }
    debug!(graph = %self.name(), parameters = assignments.len(), "loaded");
    for (node, value) in assignments {
      node.assign_value(value, true)?;
    }
    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorCategory;

  fn temp_file(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("nodegrad-{}-{name}.postcard", std::process::id()))
  }

  #[test]
  fn save_load() {
    let path = temp_file("save_load");
    let source = Graph::<f64>::seeded("source", 1);
    let w = source.parameter(&[2,3], Some("w")).unwrap();
    source.parameter(&[3,1], Some("b")).unwrap();
    source.save(&path).unwrap();

    let target = Graph::<f64>::seeded("target", 2);
    let w2 = target.parameter(&[2,3], Some("w")).unwrap();
    target.parameter(&[3,1], Some("b")).unwrap();
    assert_ne!(w.value().unwrap(), w2.value().unwrap());
    target.load(&path).unwrap();
    assert_eq!(w.value().unwrap(), w2.value().unwrap());
    fs::remove_file(&path).unwrap();
  }

  #[test]
  fn load_validates() {
    let path = temp_file("load_validates");
    let source = Graph::<f32>::new("source");
    source.parameter(&[2,2], Some("w")).unwrap();
    source.save(&path).unwrap();

    let missing = Graph::<f32>::new("missing");
    assert_eq!(missing.load(&path).unwrap_err().category(), ErrorCategory::NotFound);

    let reshaped = Graph::<f32>::new("reshaped");
    reshaped.parameter(&[4,1], Some("w")).unwrap();
    assert_eq!(reshaped.load(&path).unwrap_err().category(), ErrorCategory::Shape);
    fs::remove_file(&path).unwrap();

    assert_eq!(reshaped.load(&path).unwrap_err().category(), ErrorCategory::Io);
  }
}

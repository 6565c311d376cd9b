mod app_config;
mod demos;

use std::{
  error::Error,
  path::{Path, PathBuf},
  sync::Arc,
};

use app_config::AppConfig;
use clap::{Parser, Subcommand, ValueEnum};
use opgraph::{
  reference::DEFAULT_MAX_ITERATIONS, utils, Context, ElemKind, Graph, Model, PropagationConfig, ReferenceEvaluator,
  TensorData, TensorValue, Type, ValidationLevel, Value,
};
use serde_json::Value as Json;
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  /// YAML file with default settings
  #[arg(long, value_name = "PATH", global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
  Json,
  Yaml,
  Dot,
  Graphml,
}

#[derive(Subcommand)]
enum Command {
  /// Build a demo graph and print its emitted model
  Emit {
    #[arg(long)]
    demo: String,
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,
    /// none, structure or types
    #[arg(long)]
    validation: Option<ValidationLevel>,
    /// Write to a file instead of stdout
    #[arg(short, long, value_name = "PATH")]
    out: Option<PathBuf>,
  },
  /// Build a demo graph and run it with the reference evaluator
  Eval {
    #[arg(long)]
    demo: String,
    /// Graph input as name=JSON, e.g. x=[1,2,3]
    #[arg(short, long = "input", value_name = "NAME=JSON")]
    inputs: Vec<String>,
    #[arg(long, value_name = "INT")]
    max_iterations: Option<usize>,
  },
  /// List the available demos
  List,
}

fn build(demo: &str, config: &AppConfig) -> Result<Graph, Box<dyn Error>> {
  let demo = demos::find(demo).ok_or_else(|| format!("unknown demo `{}`, see `list`", demo))?;
  let cx = if config.propagate.unwrap_or(false) {
    let evaluator = ReferenceEvaluator::new(config.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS));
    Context::with_propagation(PropagationConfig::new(Arc::new(evaluator)))
  } else {
    Context::new()
  };
  Ok((demo.build)(&cx)?)
}

fn render(model: &Model, format: Format) -> Result<String, Box<dyn Error>> {
  Ok(match format {
    Format::Json => serde_json::to_string_pretty(model)?,
    Format::Yaml => serde_yaml::to_string(model)?,
    Format::Dot => model.to_dot(),
    Format::Graphml => model.to_graphml()?,
  })
}

/// Collects the leaves of nested JSON arrays; the shape follows the first path.
fn flatten<'j>(json: &'j Json, depth: usize, shape: &mut Vec<usize>, leaves: &mut Vec<&'j Json>) {
  match json {
    Json::Array(items) => {
      if shape.len() == depth {
        shape.push(items.len());
      }
      for item in items {
        flatten(item, depth + 1, shape, leaves);
      }
    }
    leaf => leaves.push(leaf),
  }
}

fn parse_input(ty: &Type, text: &str) -> Result<Value, Box<dyn Error>> {
  let (elem, _) = ty
    .as_tensor()
    .ok_or_else(|| format!("only tensor inputs can be given on the command line, not {}", ty))?;
  let json: Json = serde_json::from_str(text)?;
  let mut shape = Vec::new();
  let mut leaves = Vec::new();
  flatten(&json, 0, &mut shape, &mut leaves);
  let bad = |leaf: &Json| format!("{} is not a {} element", leaf, elem);
  let data = match elem {
    ElemKind::Bool => TensorData::Bool(leaves.into_iter().map(|l| l.as_bool().ok_or_else(|| bad(l))).collect::<Result<_, _>>()?),
    ElemKind::Int32 => TensorData::Int32(
      leaves
        .into_iter()
        .map(|l| l.as_i64().map(|x| x as i32).ok_or_else(|| bad(l)))
        .collect::<Result<_, _>>()?,
    ),
    ElemKind::Int64 => TensorData::Int64(leaves.into_iter().map(|l| l.as_i64().ok_or_else(|| bad(l))).collect::<Result<_, _>>()?),
    ElemKind::Float32 => TensorData::Float32(
      leaves
        .into_iter()
        .map(|l| l.as_f64().map(|x| x as f32).ok_or_else(|| bad(l)))
        .collect::<Result<_, _>>()?,
    ),
    ElemKind::Float64 => TensorData::Float64(leaves.into_iter().map(|l| l.as_f64().ok_or_else(|| bad(l))).collect::<Result<_, _>>()?),
    ElemKind::String => TensorData::String(
      leaves
        .into_iter()
        .map(|l| l.as_str().map(str::to_string).ok_or_else(|| bad(l)))
        .collect::<Result<_, _>>()?,
    ),
  };
  let tensor = TensorValue::new(shape, data).ok_or("ragged input array")?;
  Ok(Value::Tensor(tensor))
}

fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();
  let config = match &args.config {
    Some(path) => AppConfig::default().merge(AppConfig::load(path)?),
    None => AppConfig::default(),
  };

  match args.command {
    Command::Emit {
      demo,
      format,
      validation,
      out,
    } => {
      let config = config.merge(AppConfig {
        validation,
        ..AppConfig::default()
      });
      let graph = build(&demo, &config)?;
      let model = graph.emit(config.validation.unwrap_or(ValidationLevel::Structure))?;
      info!("emitted {} with {} top-level nodes", graph.name(), model.graph.nodes.len());
      match (out, format) {
        (Some(path), Format::Json) => utils::serialize_to_file(Path::new(&path), &model)?,
        (Some(path), Format::Dot) => model.save_graphviz(&path)?,
        (Some(path), format) => std::fs::write(path, render(&model, format)?)?,
        (None, format) => println!("{}", render(&model, format)?),
      }
    }
    Command::Eval {
      demo,
      inputs,
      max_iterations,
    } => {
      let config = config.merge(AppConfig {
        max_iterations,
        ..AppConfig::default()
      });
      let graph = build(&demo, &config)?;
      let arguments = graph.arguments()?;
      let mut feeds = Vec::new();
      for input in &inputs {
        let (name, text) = input
          .split_once('=')
          .ok_or_else(|| format!("expected NAME=JSON, got `{}`", input))?;
        let (_, var) = arguments
          .iter()
          .find(|(n, _)| n.as_str() == name)
          .ok_or_else(|| format!("{} has no input `{}`", graph.name(), name))?;
        feeds.push((name, parse_input(var.ty(), text)?));
      }
      let evaluator = ReferenceEvaluator::new(config.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS));
      for (name, value) in graph.evaluate(&evaluator, &feeds)? {
        println!("{} = {}", name, value);
      }
    }
    Command::List => {
      for demo in demos::all() {
        println!("{:<10} {}", demo.name, demo.about);
      }
    }
  }
  Ok(())
}

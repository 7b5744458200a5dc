use crate::bytecode::{Method, Program};
use crate::cfg::visualization::generate_control_dependence_dot;
use crate::cfg::{Cfg, CfgOptions, ControlDependences, ReachabilityAnalyser, WorklistOptions};
use crate::error::{Error as SlicerError, Result as SlicerResult};
use crate::trace::TraceBundle;
use rayon::prelude::*;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Arguments of the `cfg` subcommand
#[derive(Debug, Clone, Default)]
pub struct CfgArgs {
    pub input_path: PathBuf,
    /// `Class.name`; all methods when absent
    pub method: Option<String>,
    pub dot_path: Option<PathBuf>,
    pub control_dependences: bool,
}

/// Summarize the control flow graphs of the methods in a trace bundle
pub fn cfg(args: &CfgArgs) -> SlicerResult<()> {
    let bundle = TraceBundle::load(&args.input_path)?;
    let methods = select_methods(&bundle.program, args.method.as_deref())?;
    println!("Methods: {}", methods.len());

    // Analyse in parallel, print in method order
    let reports: Vec<(String, String)> = methods
        .par_iter()
        .map(|method| analyze_method(method, args.control_dependences))
        .collect();

    let mut dot = String::new();
    for (summary, method_dot) in reports {
        print!("{}", summary);
        dot.push_str(&method_dot);
    }

    if let Some(dot_path) = &args.dot_path {
        write_dot(dot_path, &dot)?;
        println!("DOT exported to: {}", dot_path.display());
    }
    Ok(())
}

fn select_methods<'p>(program: &'p Program, name: Option<&'p str>) -> SlicerResult<Vec<&'p Method>> {
    let Some(name) = name else {
        return Ok(program.methods().iter().collect());
    };
    let (class_name, method_name) = name.rsplit_once('.').ok_or_else(|| SlicerError::Internal {
        message: format!("Expected Class.method, got '{}'", name),
    })?;
    let methods: Vec<_> = program.find_methods(class_name, method_name).collect();
    if methods.is_empty() {
        return Err(SlicerError::Internal {
            message: format!("No method named {} in the bundle", name),
        });
    }
    Ok(methods)
}

/// Summary text and DOT graphs of one method
fn analyze_method(method: &Method, with_dependences: bool) -> (String, String) {
    let cfg = Cfg::build(method, CfgOptions::default());
    let mut summary = String::new();
    let _ = writeln!(summary, "{}", method);
    let _ = writeln!(summary, "  Instructions: {}", method.len());
    let _ = writeln!(summary, "  Nodes: {}", cfg.node_count());
    let _ = writeln!(summary, "  Edges: {}", cfg.edge_count());
    let _ = writeln!(summary, "  Exception handlers: {}", method.exception_handlers.len());

    let mut dot = cfg.to_dot(method);
    if with_dependences {
        let mut analyser = ReachabilityAnalyser::new(WorklistOptions::default());
        let dependences = ControlDependences::compute(method, &mut analyser);
        let _ = writeln!(summary, "  Control dependences:");
        for (index, dependents) in dependences.iter() {
            let dependents: Vec<String> = dependents.iter().map(|d| d.to_string()).collect();
            let _ = writeln!(summary, "    {} -> {}", index, dependents.join(", "));
        }
        dot.push_str(&generate_control_dependence_dot(&dependences, method));
    }

    (summary, dot)
}

fn write_dot(path: &Path, content: &str) -> SlicerResult<()> {
    std::fs::write(path, content)
        .map_err(|e| SlicerError::Io(format!("Failed to write DOT file: {}", e)))
}

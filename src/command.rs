use super::*;

/// One console request, parsed from a command line such as
/// `methods cpu 20` or `history pkg.Cls`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Command {
  Alert(String),
  Alerts,
  Classes {
    column: ClassColumn,
    limit: Option<usize>,
  },
  Disable,
  Enable,
  Fields(String),
  History(String),
  Methods {
    column: MethodColumn,
    limit: Option<usize>,
  },
  Mode(ProfilerMode),
  Reset,
  ResetAlert(String),
  Set {
    key: String,
    values: Vec<String>,
  },
  Threads,
  Trace,
}

impl Command {
  /// Run against `profiler`, returning the report to render.
  ///
  /// # Errors
  ///
  /// Returns an error for unknown classes and rejected properties.
  pub fn execute(&self, profiler: &Profiler) -> Result<Tag> {
    Ok(match self {
      Self::Alert(class) => profiler.dump_history(class)?,
      Self::Alerts => profiler.dump_alerts(),
      Self::Classes { column, limit } => profiler.dump_heap(*column, *limit),
      Self::Disable => {
        profiler.disable();
        status(self.name(), profiler)
      }
      Self::Enable => {
        profiler.enable();
        status(self.name(), profiler)
      }
      Self::Fields(class) => profiler.dump_fields(class)?,
      Self::History(class) => profiler.dump_history(class)?,
      Self::Methods { column, limit } => {
        profiler.dump_methods(*column, *limit)
      }
      Self::Mode(mode) => {
        profiler.set_mode(*mode);
        status(self.name(), profiler)
      }
      Self::Reset => {
        profiler.reset();
        status(self.name(), profiler)
      }
      Self::ResetAlert(class) => {
        profiler.reset_alert(class)?;
        status(self.name(), profiler).text("class", class.as_str())
      }
      Self::Set { key, values } => {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        profiler.apply_property(key, &values)?;
        status(self.name(), profiler).text("key", key.as_str())
      }
      Self::Threads => profiler.dump_threads(),
      Self::Trace => profiler.drain_trace(),
    })
  }

  #[must_use]
  pub fn name(&self) -> &'static str {
    match self {
      Self::Alert(_) => "alert",
      Self::Alerts => "alerts",
      Self::Classes { .. } => "classes",
      Self::Disable => "disable",
      Self::Enable => "enable",
      Self::Fields(_) => "fields",
      Self::History(_) => "history",
      Self::Methods { .. } => "methods",
      Self::Mode(_) => "mode",
      Self::Reset => "reset",
      Self::ResetAlert(_) => "resetalert",
      Self::Set { .. } => "set",
      Self::Threads => "threads",
      Self::Trace => "trace",
    }
  }
}

impl FromStr for Command {
  type Err = ProfilerError;

  fn from_str(line: &str) -> Result<Self> {
    let mut words = line.split_whitespace();

    let Some(verb) = words.next() else {
      return Err(ProfilerError::UnknownCommand(String::new()));
    };

    let rest: Vec<&str> = words.collect();

    Ok(match verb.to_ascii_lowercase().as_str() {
      "alert" => Self::Alert(class_argument("alert", &rest)?),
      "alerts" => Self::Alerts,
      "classes" | "heap" => {
        let (column, limit) = sort_arguments("classes", &rest)?;
        Self::Classes {
          column: column.map_or(Ok(ClassColumn::Size), str::parse)?,
          limit,
        }
      }
      "disable" => Self::Disable,
      "enable" => Self::Enable,
      "fields" => Self::Fields(class_argument("fields", &rest)?),
      "history" => Self::History(class_argument("history", &rest)?),
      "methods" => {
        let (column, limit) = sort_arguments("methods", &rest)?;
        Self::Methods {
          column: column.map_or(Ok(MethodColumn::CpuTime), str::parse)?,
          limit,
        }
      }
      "mode" => match rest.as_slice() {
        [mode] => Self::Mode(mode.parse()?),
        _ => {
          return Err(ProfilerError::InvalidArgument {
            command: "mode",
            reason: "expected one of profile, trigger, jarm, ats".into(),
          });
        }
      },
      "reset" => Self::Reset,
      "resetalert" => {
        Self::ResetAlert(class_argument("resetalert", &rest)?)
      }
      "set" => {
        let Some((key, values)) = rest.split_first() else {
          return Err(ProfilerError::InvalidArgument {
            command: "set",
            reason: "expected a property key".into(),
          });
        };

        Self::Set {
          key: (*key).to_string(),
          values: values
            .join(" ")
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(String::from)
            .collect(),
        }
      }
      "threads" => Self::Threads,
      "trace" => Self::Trace,
      _ => return Err(ProfilerError::UnknownCommand(verb.into())),
    })
  }
}

impl Profiler {
  /// Parse and run one console line.
  ///
  /// # Errors
  ///
  /// Returns an error for unparseable lines or failed commands.
  pub fn execute(&self, line: &str) -> Result<Tag> {
    let command: Command = line.parse()?;
    debug!(command = command.name(), "console command");
    self.run_suppressed(|| command.execute(self))
  }
}

fn class_argument(command: &'static str, rest: &[&str]) -> Result<String> {
  match rest {
    [class] => Ok(normalize_class_name(class)),
    _ => Err(ProfilerError::InvalidArgument {
      command,
      reason: "expected a class name".into(),
    }),
  }
}

/// `[column] [limit]` in either order.
fn sort_arguments<'a>(
  command: &'static str,
  rest: &[&'a str],
) -> Result<(Option<&'a str>, Option<usize>)> {
  let mut column = None;
  let mut limit = None;

  for &argument in rest {
    match argument.parse::<usize>() {
      Ok(value) if limit.is_none() => limit = Some(value),
      Err(_) if column.is_none() => column = Some(argument),
      _ => {
        return Err(ProfilerError::InvalidArgument {
          command,
          reason: format!("unexpected argument `{argument}`"),
        });
      }
    }
  }

  Ok((column, limit))
}

fn status(command: &'static str, profiler: &Profiler) -> Tag {
  Tag::leaf("status")
    .text("command", command)
    .text("enabled", if profiler.is_enabled() { "yes" } else { "no" })
    .text("mode", profiler.mode().name())
}

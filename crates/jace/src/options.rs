//! Virtual machine bootstrap options.
//!
//! An [`OptionList`] is an ordered list of [`VmOption`]s handed to the loader
//! unchanged when the runtime is created. The bridge never interprets the
//! options itself; [`OptionList::render`] produces the `JavaVMOption`
//! equivalent (an option string plus optional extra info) in list order.
//!
//! # Example
//!
//! ```
//! use jace::options::{OptionList, PATH_SEPARATOR, VmOption};
//!
//! let options = OptionList::new()
//!     .with(VmOption::class_path("lib/bioformats.jar"))
//!     .with(VmOption::class_path("lib/jace-runtime.jar"))
//!     .with(VmOption::max_heap("512m"))
//!     .with(VmOption::system_property("java.awt.headless", "true"));
//!
//! let rendered = options.render();
//! assert_eq!(rendered.len(), 3);
//! assert_eq!(
//!     rendered[0].option_string,
//!     format!("-Djava.class.path=lib/bioformats.jar{PATH_SEPARATOR}lib/jace-runtime.jar")
//! );
//! assert_eq!(rendered[1].option_string, "-Xmx512m");
//! assert_eq!(rendered[2].option_string, "-Djava.awt.headless=true");
//! ```

use std::fmt;

/// Path list separator used when merging class path entries.
#[cfg(windows)]
pub const PATH_SEPARATOR: char = ';';
/// Path list separator used when merging class path entries.
#[cfg(not(windows))]
pub const PATH_SEPARATOR: char = ':';

/// Native callback the runtime uses instead of `vfprintf`.
pub type VfprintfHook = fn(message: &str) -> i32;
/// Native callback the runtime invokes on `System.exit`.
pub type ExitHook = fn(status: i32);
/// Native callback the runtime invokes on abort.
pub type AbortHook = fn();

/// A native hook passed as a `JavaVMOption.extraInfo`.
///
/// Hooks are plain function pointers and have no meaningful equality;
/// compare them by [`name`](Self::name).
#[derive(Clone, Copy)]
pub enum Hook {
    /// `vfprintf`
    Vfprintf(VfprintfHook),
    /// `exit`
    Exit(ExitHook),
    /// `abort`
    Abort(AbortHook),
}

impl Hook {
    /// The `optionString` the runtime recognizes the hook by.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Hook::Vfprintf(_) => "vfprintf",
            Hook::Exit(_) => "exit",
            Hook::Abort(_) => "abort",
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Vfprintf(h) => write!(f, "Vfprintf({:p})", *h as *const ()),
            Hook::Exit(h) => write!(f, "Exit({:p})", *h as *const ()),
            Hook::Abort(h) => write!(f, "Abort({:p})", *h as *const ()),
        }
    }
}

/// One bootstrap option.
#[derive(Debug, Clone)]
pub enum VmOption {
    /// A class path entry. All entries are merged into one
    /// `-Djava.class.path=` option when rendered.
    ClassPath(String),
    /// `-D<name>=<value>`
    SystemProperty {
        /// Property name
        name: String,
        /// Property value
        value: String,
    },
    /// `-verbose:<component>`
    Verbose(String),
    /// `-Xms<size>`
    InitialHeap(String),
    /// `-Xmx<size>`
    MaxHeap(String),
    /// `-Xss<size>`
    ThreadStack(String),
    /// `-ea[:<package>]`
    EnableAssertions(Option<String>),
    /// `-da[:<package>]`
    DisableAssertions(Option<String>),
    /// `-javaagent:<jar>[=<options>]`
    JavaAgent {
        /// Agent jar path
        path: String,
        /// Agent options
        options: Option<String>,
    },
    /// Passed through verbatim.
    Custom(String),
    /// A native hook.
    Hook(Hook),
}

impl VmOption {
    /// A class path entry.
    pub fn class_path(entry: impl Into<String>) -> Self {
        VmOption::ClassPath(entry.into())
    }

    /// A `-D` system property.
    pub fn system_property(name: impl Into<String>, value: impl Into<String>) -> Self {
        VmOption::SystemProperty {
            name: name.into(),
            value: value.into(),
        }
    }

    /// `-Xms`
    pub fn initial_heap(size: impl Into<String>) -> Self {
        VmOption::InitialHeap(size.into())
    }

    /// `-Xmx`
    pub fn max_heap(size: impl Into<String>) -> Self {
        VmOption::MaxHeap(size.into())
    }

    /// `-Xss`
    pub fn thread_stack(size: impl Into<String>) -> Self {
        VmOption::ThreadStack(size.into())
    }

    /// A verbatim option string.
    pub fn custom(option: impl Into<String>) -> Self {
        VmOption::Custom(option.into())
    }

    fn render(&self) -> RenderedOption {
        let text = match self {
            VmOption::ClassPath(entry) => format!("-Djava.class.path={entry}"),
            VmOption::SystemProperty { name, value } => format!("-D{name}={value}"),
            VmOption::Verbose(component) => format!("-verbose:{component}"),
            VmOption::InitialHeap(size) => format!("-Xms{size}"),
            VmOption::MaxHeap(size) => format!("-Xmx{size}"),
            VmOption::ThreadStack(size) => format!("-Xss{size}"),
            VmOption::EnableAssertions(None) => "-ea".to_owned(),
            VmOption::EnableAssertions(Some(pkg)) => format!("-ea:{pkg}"),
            VmOption::DisableAssertions(None) => "-da".to_owned(),
            VmOption::DisableAssertions(Some(pkg)) => format!("-da:{pkg}"),
            VmOption::JavaAgent { path, options } => match options {
                Some(opts) => format!("-javaagent:{path}={opts}"),
                None => format!("-javaagent:{path}"),
            },
            VmOption::Custom(option) => option.clone(),
            VmOption::Hook(hook) => {
                return RenderedOption {
                    option_string: hook.name().to_owned(),
                    extra_info: Some(*hook),
                };
            }
        };
        RenderedOption {
            option_string: text,
            extra_info: None,
        }
    }
}

/// The `JavaVMOption` form of a [`VmOption`].
#[derive(Debug, Clone)]
pub struct RenderedOption {
    /// `optionString`
    pub option_string: String,
    /// `extraInfo`
    pub extra_info: Option<Hook>,
}

/// Ordered bootstrap options.
#[derive(Debug, Clone, Default)]
pub struct OptionList {
    options: Vec<VmOption>,
}

impl OptionList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an option, builder style.
    #[must_use]
    pub fn with(mut self, option: VmOption) -> Self {
        self.options.push(option);
        self
    }

    /// Appends an option.
    pub fn push(&mut self, option: VmOption) {
        self.options.push(option);
    }

    /// Number of options as given (before class path merging).
    #[must_use]
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// True if no options were given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Iterates the options in order.
    pub fn iter(&self) -> impl Iterator<Item = &VmOption> {
        self.options.iter()
    }

    /// Class path entries in order.
    pub fn class_path(&self) -> impl Iterator<Item = &str> {
        self.options.iter().filter_map(|o| match o {
            VmOption::ClassPath(entry) => Some(entry.as_str()),
            _ => None,
        })
    }

    /// Hooks in order.
    pub fn hooks(&self) -> impl Iterator<Item = Hook> + '_ {
        self.options.iter().filter_map(|o| match o {
            VmOption::Hook(h) => Some(*h),
            _ => None,
        })
    }

    /// Renders the list to `JavaVMOption` form.
    ///
    /// Class path entries are joined with [`PATH_SEPARATOR`] into a single
    /// `-Djava.class.path=` option placed at the position of the first entry.
    #[must_use]
    pub fn render(&self) -> Vec<RenderedOption> {
        let joined: Vec<&str> = self.class_path().collect();
        let mut class_path_emitted = false;
        let mut rendered = Vec::with_capacity(self.options.len());

        for option in &self.options {
            if let VmOption::ClassPath(_) = option {
                if !class_path_emitted {
                    class_path_emitted = true;
                    let sep = PATH_SEPARATOR.to_string();
                    rendered.push(RenderedOption {
                        option_string: format!("-Djava.class.path={}", joined.join(&sep)),
                        extra_info: None,
                    });
                }
                continue;
            }
            rendered.push(option.render());
        }
        rendered
    }
}

impl FromIterator<VmOption> for OptionList {
    fn from_iter<I: IntoIterator<Item = VmOption>>(iter: I) -> Self {
        OptionList {
            options: iter.into_iter().collect(),
        }
    }
}

//! Bootstrap shim rendered into every archive.
//!
//! The runtime executes `bootstrap` as the function handler. It either hands
//! the binary to the bundled dynamic linker explicitly, or points the system
//! linker at the bundled `lib/` directory.

/// Execution-environment marker exported before `exec`.
pub const EXECUTION_ENV: &str = "lambda-cpp";

/// Script for archives that bundle the C library and its loader.
pub fn render_with_loader(loader: &str, binary: &str) -> String {
    format!(
        "#!/bin/bash\n\
         set -euo pipefail\n\
         export AWS_EXECUTION_ENV={EXECUTION_ENV}\n\
         exec $LAMBDA_TASK_ROOT/lib/{loader} --library-path $LAMBDA_TASK_ROOT/lib \
         $LAMBDA_TASK_ROOT/bin/{binary} ${{_HANDLER}}\n"
    )
}

/// Script for archives that rely on the runtime's own C library.
pub fn render_with_search_path(binary: &str) -> String {
    format!(
        "#!/bin/bash\n\
         set -euo pipefail\n\
         export AWS_EXECUTION_ENV={EXECUTION_ENV}\n\
         export LD_LIBRARY_PATH=$LAMBDA_TASK_ROOT/lib${{LD_LIBRARY_PATH:+:$LD_LIBRARY_PATH}}\n\
         exec $LAMBDA_TASK_ROOT/bin/{binary} ${{_HANDLER}}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_script_invokes_loader() {
        let script = render_with_loader("ld-linux-x86-64.so.2", "app-1");
        assert!(script.starts_with("#!/bin/bash\nset -euo pipefail\n"));
        assert!(script.contains("export AWS_EXECUTION_ENV=lambda-cpp\n"));
        assert!(script.ends_with(
            "exec $LAMBDA_TASK_ROOT/lib/ld-linux-x86-64.so.2 --library-path $LAMBDA_TASK_ROOT/lib $LAMBDA_TASK_ROOT/bin/app-1 ${_HANDLER}\n"
        ));
    }

    #[test]
    fn search_path_script_prepends_lib_dir() {
        let script = render_with_search_path("app-1");
        assert!(script.contains("set -euo pipefail"));
        assert!(script.contains(
            "export LD_LIBRARY_PATH=$LAMBDA_TASK_ROOT/lib${LD_LIBRARY_PATH:+:$LD_LIBRARY_PATH}\n"
        ));
        assert!(script.ends_with("exec $LAMBDA_TASK_ROOT/bin/app-1 ${_HANDLER}\n"));
        assert!(!script.contains("--library-path"));
    }
}

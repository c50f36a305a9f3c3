use bulkhaul_engine::PluginRegistry;

/// Execute the `plugins` command: list the built-in plugins by category.
pub fn execute() {
    let registry = PluginRegistry::with_builtins();
    let mut current = None;

    for (category, ty) in registry.list() {
        if current != Some(category) {
            println!("{category}:");
            current = Some(category);
        }
        println!("  {ty}");
    }
}

/// Failure to apply the structural edit to a parsed class
#[derive(Debug)]
pub enum MutationError {
    /// The method's result type is a primitive, so there is no "no value" result to lower the
    /// injected statement into
    PrimitiveResult { method: String, descriptor: String },
}

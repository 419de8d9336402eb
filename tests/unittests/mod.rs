mod history {
    include!("history.rs");
}
mod diagnostics {
    include!("diagnostics.rs");
}
mod input {
    include!("input.rs");
}

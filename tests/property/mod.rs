// Property-based tests harness
mod transactions {
    include!("transactions.rs");
}
mod arithmetic {
    include!("arithmetic.rs");
}

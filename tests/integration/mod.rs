mod session {
    include!("session.rs");
}
mod unload {
    include!("unload.rs");
}
mod shadowing {
    include!("shadowing.rs");
}
mod linking {
    include!("linking.rs");
}
mod callbacks {
    include!("callbacks.rs");
}

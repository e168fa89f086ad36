pub mod stuffed_pointer;

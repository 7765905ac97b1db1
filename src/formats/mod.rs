pub mod px;

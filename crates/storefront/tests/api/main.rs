mod admin_test;
mod checkout_test;
mod helpers;
